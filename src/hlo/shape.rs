// src/hlo/shape.rs

//! Value shapes, reduced to what memory accounting needs: byte sizes of
//! array leaves and the nesting of tuples.

use std::fmt;

/// Bytes reserved per element of a tuple pointer table.
pub const POINTER_SIZE: u64 = 8;

/// Path of a sub-shape inside a (possibly nested) tuple. Empty for the
/// top-level shape.
pub type ShapeIndex = Vec<usize>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Array { bytes: u64 },
    Tuple(Vec<Shape>),
}

/// Shape-size oracle used for memory pressure.
pub type ShapeSizeFn = fn(&Shape) -> u64;

/// Default size function: array bytes, or the pointer table for a tuple.
pub fn shape_size_bytes(shape: &Shape) -> u64 {
    match shape {
        Shape::Array { bytes } => *bytes,
        Shape::Tuple(elements) => POINTER_SIZE * elements.len() as u64,
    }
}

impl Shape {
    pub fn array(bytes: u64) -> Self {
        Shape::Array { bytes }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Shape::Array { .. })
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Shape::Tuple(_))
    }

    pub fn tuple_element(&self, index: usize) -> Option<&Shape> {
        match self {
            Shape::Tuple(elements) => elements.get(index),
            Shape::Array { .. } => None,
        }
    }

    pub fn subshape(&self, index: &[usize]) -> Option<&Shape> {
        let mut current = self;
        for &i in index {
            current = current.tuple_element(i)?;
        }
        Some(current)
    }

    /// All indices of this shape in pre-order, starting with `{}`.
    pub fn indices(&self) -> Vec<ShapeIndex> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        collect_indices(self, &mut prefix, &mut out);
        out
    }
}

fn collect_indices(shape: &Shape, prefix: &mut ShapeIndex, out: &mut Vec<ShapeIndex>) {
    out.push(prefix.clone());
    if let Shape::Tuple(elements) = shape {
        for (i, element) in elements.iter().enumerate() {
            prefix.push(i);
            collect_indices(element, prefix, out);
            prefix.pop();
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Array { bytes } => write!(f, "{bytes}B"),
            Shape::Tuple(elements) => {
                f.write_str("(")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str(")")
            }
        }
    }
}
