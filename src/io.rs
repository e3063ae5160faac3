//! Flat binary persistence for the node arena.
//!
//! Layout (packed, little-endian, field order mandatory):
//! header `{num_particles: u64, num_octs: u64, n_ref: i32,
//! over_refine_factor: i32, density_factor: i32, data_version: i64}`,
//! then `num_particles` `u64` permutation entries, then `num_octs` node
//! records `{left_edge: 3xf64, right_edge: 3xf64, start: u64, end: u64,
//! parent: u64, children: u64, leaf: u8, node_id: u64, leaf_id: u64,
//! depth: i32}`. There is no magic number and no format version:
//! `data_version` is a caller-defined cache tag, and compatibility across
//! format changes is the caller's responsibility.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::debug;
use nalgebra::Vector3;

use crate::bounds::Bounds;
use crate::error::{OctreeError, Result};
use crate::node::Node;
use crate::tree::Octree;

/// Sentinel for an absent parent/children/leaf_id link.
const NO_INDEX: u64 = u64::MAX;

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => OctreeError::CorruptFile("truncated stream".into()),
        _ => OctreeError::Io(e),
    })?;
    Ok(buf)
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(reader)?))
}

fn read_i64<R: Read>(reader: &mut R) -> Result<i64> {
    Ok(i64::from_le_bytes(read_array(reader)?))
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    Ok(i32::from_le_bytes(read_array(reader)?))
}

fn read_f64<R: Read>(reader: &mut R) -> Result<f64> {
    Ok(f64::from_le_bytes(read_array(reader)?))
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    Ok(read_array::<R, 1>(reader)?[0])
}

fn link_to_u64(link: Option<usize>) -> u64 {
    link.map_or(NO_INDEX, |i| i as u64)
}

fn link_from_u64(raw: u64) -> Option<usize> {
    (raw != NO_INDEX).then_some(raw as usize)
}

fn write_node<W: Write>(writer: &mut W, node: &Node) -> Result<()> {
    for axis in 0..3 {
        writer.write_all(&node.left_edge[axis].to_le_bytes())?;
    }
    for axis in 0..3 {
        writer.write_all(&node.right_edge[axis].to_le_bytes())?;
    }
    writer.write_all(&(node.start as u64).to_le_bytes())?;
    writer.write_all(&(node.end as u64).to_le_bytes())?;
    writer.write_all(&link_to_u64(node.parent).to_le_bytes())?;
    writer.write_all(&link_to_u64(node.children).to_le_bytes())?;
    writer.write_all(&[node.leaf as u8])?;
    writer.write_all(&(node.node_id as u64).to_le_bytes())?;
    writer.write_all(&link_to_u64(node.leaf_id).to_le_bytes())?;
    writer.write_all(&(node.depth as i32).to_le_bytes())?;
    Ok(())
}

fn read_node<R: Read>(reader: &mut R) -> Result<Node> {
    let mut edges = [0.0f64; 6];
    for edge in &mut edges {
        *edge = read_f64(reader)?;
    }
    let start = read_u64(reader)? as usize;
    let end = read_u64(reader)? as usize;
    let parent = link_from_u64(read_u64(reader)?);
    let children = link_from_u64(read_u64(reader)?);
    let leaf = read_u8(reader)? != 0;
    let node_id = read_u64(reader)? as usize;
    let leaf_id = link_from_u64(read_u64(reader)?);
    let depth = read_i32(reader)?;
    if end < start {
        return Err(OctreeError::CorruptFile(format!(
            "node {node_id} has inverted range {start}..{end}"
        )));
    }
    if depth < 0 {
        return Err(OctreeError::CorruptFile(format!(
            "node {node_id} has negative depth {depth}"
        )));
    }
    Ok(Node {
        left_edge: Vector3::new(edges[0], edges[1], edges[2]),
        right_edge: Vector3::new(edges[3], edges[4], edges[5]),
        start,
        end,
        parent,
        children,
        leaf,
        node_id,
        leaf_id,
        depth: depth as u32,
    })
}

impl Octree {
    /// Writes the arena and metadata to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(OctreeError::Configuration("empty output path".into()));
        }
        let mut writer = BufWriter::new(File::create(path)?);

        writer.write_all(&(self.idx.len() as u64).to_le_bytes())?;
        writer.write_all(&(self.nodes.len() as u64).to_le_bytes())?;
        writer.write_all(&(self.n_ref as i32).to_le_bytes())?;
        writer.write_all(&(self.over_refine_factor as i32).to_le_bytes())?;
        writer.write_all(&(self.density_factor as i32).to_le_bytes())?;
        writer.write_all(&self.data_version.to_le_bytes())?;

        for &id in &self.idx {
            writer.write_all(&id.to_le_bytes())?;
        }
        for node in &self.nodes {
            write_node(&mut writer, node)?;
        }
        writer.flush()?;
        debug!(
            "saved octree to {}: {} nodes, {} particles",
            path.display(),
            self.nodes.len(),
            self.idx.len()
        );
        Ok(())
    }

    /// Reconstructs a tree from `path`, fully replacing in-memory state.
    ///
    /// Relies on the build-time invariant that each record's `node_id`
    /// equals its file position; a violation is rejected as corruption,
    /// since parent/children links would silently go wrong otherwise.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(OctreeError::Configuration("empty input path".into()));
        }
        let mut reader = BufReader::new(File::open(path)?);

        let num_particles = read_u64(&mut reader)? as usize;
        let num_octs = read_u64(&mut reader)? as usize;
        let n_ref = read_i32(&mut reader)?;
        let over_refine_factor = read_i32(&mut reader)?;
        let density_factor = read_i32(&mut reader)?;
        let data_version = read_i64(&mut reader)?;

        if num_octs == 0 {
            return Err(OctreeError::CorruptFile(format!(
                "header claims {num_particles} particles but an empty node arena"
            )));
        }
        if n_ref < 0 || over_refine_factor < 0 || density_factor < 1 {
            return Err(OctreeError::CorruptFile(format!(
                "implausible header parameters: n_ref {n_ref}, over_refine_factor \
                 {over_refine_factor}, density_factor {density_factor}"
            )));
        }
        // Derived shift widths must stay below the word size, as at build.
        if 3 * density_factor as u64 >= usize::BITS as u64
            || 3 * over_refine_factor as u64 >= usize::BITS as u64
        {
            return Err(OctreeError::CorruptFile(format!(
                "refinement factors out of range: density_factor {density_factor}, \
                 over_refine_factor {over_refine_factor}"
            )));
        }
        let branching = 1usize << (3 * density_factor);

        let mut idx = Vec::new();
        idx.try_reserve_exact(num_particles).map_err(|e| {
            OctreeError::Allocation(format!(
                "cannot reserve index array for {num_particles} particles: {e}"
            ))
        })?;
        for _ in 0..num_particles {
            let id = read_u64(&mut reader)?;
            if id as usize >= num_particles {
                return Err(OctreeError::CorruptFile(format!(
                    "particle index {id} out of range for {num_particles} particles"
                )));
            }
            idx.push(id);
        }

        let mut nodes = Vec::new();
        nodes.try_reserve_exact(num_octs).map_err(|e| {
            OctreeError::Allocation(format!("cannot reserve arena for {num_octs} nodes: {e}"))
        })?;
        for file_pos in 0..num_octs {
            let node = read_node(&mut reader)?;
            if node.node_id != file_pos {
                return Err(OctreeError::CorruptFile(format!(
                    "node record {file_pos} carries id {}",
                    node.node_id
                )));
            }
            // Arena links are trusted by traversal; reject any that point
            // outside the arena before they can be followed.
            if let Some(parent) = node.parent {
                if parent >= num_octs {
                    return Err(OctreeError::CorruptFile(format!(
                        "node {file_pos} has parent link {parent} outside the \
                         {num_octs}-node arena"
                    )));
                }
            }
            if let Some(children) = node.children {
                if children
                    .checked_add(branching)
                    .map_or(true, |last| last > num_octs)
                {
                    return Err(OctreeError::CorruptFile(format!(
                        "node {file_pos} has children link {children} outside the \
                         {num_octs}-node arena"
                    )));
                }
            }
            if let Some(leaf_id) = node.leaf_id {
                if leaf_id >= num_octs {
                    return Err(OctreeError::CorruptFile(format!(
                        "node {file_pos} has leaf id {leaf_id} outside the \
                         {num_octs}-node arena"
                    )));
                }
            }
            nodes.push(node);
        }

        // The root record carries the global bounds.
        let domain = Bounds::new(nodes[0].left_edge, nodes[0].right_edge);
        debug!(
            "loaded octree from {}: {} nodes, {} particles",
            path.display(),
            num_octs,
            num_particles
        );
        Ok(Self {
            nodes,
            domain,
            idx,
            n_ref: n_ref as usize,
            over_refine_factor: over_refine_factor as u32,
            density_factor: density_factor as u32,
            data_version,
        })
    }
}
