//! Bottom-up serialization of the node tree.
//!
//! Payload blocks (record columns, blob segments) are appended to the stream
//! while the archive is open. On close the tree itself is written leaves
//! first so every group table only references positions already on disk.

use byteorder::{LittleEndian, WriteBytesExt};

use super::format::*;
use super::node::*;
use super::stream::OStream;
use crate::util::Result;

/// Encode the header block of a node: tag byte plus fixed payload.
fn encode_header(node: &Node) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(48);
    match node {
        Node::Element(Element::Integer { value, min, max }) => {
            buf.write_u8(tag::INTEGER)?;
            buf.write_i64::<LittleEndian>(*value)?;
            buf.write_i64::<LittleEndian>(*min)?;
            buf.write_i64::<LittleEndian>(*max)?;
        }
        Node::Element(Element::ScaledInteger {
            raw,
            min,
            max,
            scale,
            offset,
        }) => {
            buf.write_u8(tag::SCALED_INTEGER)?;
            buf.write_i64::<LittleEndian>(*raw)?;
            buf.write_i64::<LittleEndian>(*min)?;
            buf.write_i64::<LittleEndian>(*max)?;
            buf.write_f64::<LittleEndian>(*scale)?;
            buf.write_f64::<LittleEndian>(*offset)?;
        }
        Node::Element(Element::Float {
            value,
            precision,
            min,
            max,
        }) => {
            buf.write_u8(tag::FLOAT)?;
            buf.write_u8(match precision {
                FloatPrecision::Single => 0,
                FloatPrecision::Double => 1,
            })?;
            buf.write_f64::<LittleEndian>(*value)?;
            buf.write_f64::<LittleEndian>(*min)?;
            buf.write_f64::<LittleEndian>(*max)?;
        }
        Node::Element(Element::String(s)) => {
            buf.write_u8(tag::STRING)?;
            buf.extend_from_slice(s.as_bytes());
        }
        Node::Blob(blob) => {
            buf.write_u8(tag::BLOB)?;
            buf.write_u64::<LittleEndian>(blob.byte_count)?;
        }
        Node::Structure(_) => buf.write_u8(tag::STRUCTURE)?,
        Node::Vector(v) => {
            buf.write_u8(tag::VECTOR)?;
            buf.write_u8(v.allow_hetero as u8)?;
        }
        Node::CompressedVector(cv) => {
            buf.write_u8(tag::COMPRESSED_VECTOR)?;
            buf.write_u64::<LittleEndian>(cv.record_count)?;
        }
    }
    Ok(buf)
}

/// Write the subtree rooted at `id`, returning the position of its group.
pub(crate) fn write_tree(stream: &mut OStream, entries: &[Entry], id: NodeId) -> Result<u64> {
    let node = &entries[id.0].node;
    let mut children = Vec::new();

    match node {
        Node::Structure(s) => {
            for (name, child) in &s.children {
                let child_pos = write_tree(stream, entries, *child)?;
                let name_pos = stream.write_data_block(name.as_bytes())?;
                children.push(make_data_offset(name_pos));
                children.push(make_group_offset(child_pos));
            }
        }
        Node::Vector(v) => {
            for child in &v.children {
                children.push(make_group_offset(write_tree(stream, entries, *child)?));
            }
        }
        Node::CompressedVector(cv) => {
            children.push(make_group_offset(write_tree(stream, entries, cv.prototype)?));
            children.push(make_group_offset(write_tree(stream, entries, cv.codecs)?));
            for chunk in &cv.chunks {
                let count_pos = stream.write_data_block(&chunk.record_count.to_le_bytes())?;
                let mut table = Vec::with_capacity(chunk.columns.len() + 1);
                table.push(make_data_offset(count_pos));
                table.extend(chunk.columns.iter().map(|&c| make_data_offset(c)));
                children.push(make_group_offset(stream.write_group(&table)?));
            }
        }
        Node::Blob(blob) => {
            // Segment blocks start 16 bytes before their payload.
            children.extend(blob.segments.iter().map(|s| make_data_offset(s.data_pos - 16)));
        }
        Node::Element(_) => {}
    }

    let header_pos = stream.write_data_block(&encode_header(node)?)?;
    let mut table = Vec::with_capacity(children.len() + 1);
    table.push(make_data_offset(header_pos));
    table.extend(children);
    stream.write_group(&table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header_tags() {
        let int = Node::Element(Element::Integer {
            value: 5,
            min: 0,
            max: 10,
        });
        let bytes = encode_header(&int).unwrap();
        assert_eq!(bytes[0], tag::INTEGER);
        assert_eq!(bytes.len(), 1 + 24);

        let s = Node::Element(Element::String("abc".into()));
        assert_eq!(encode_header(&s).unwrap(), b"\x04abc");

        let v = Node::Vector(Vector {
            allow_hetero: true,
            children: Vec::new(),
        });
        assert_eq!(encode_header(&v).unwrap(), [tag::VECTOR, 1]);
    }
}
