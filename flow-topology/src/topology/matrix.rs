use std::fmt;

/// A square matrix indexed by node name.
///
/// Rows and columns follow `names`, which the topology always passes in
/// lexicographic order so that matrix output is deterministic regardless of
/// map iteration order.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMatrix<T> {
    names: Vec<String>,
    cells: Vec<T>,
}

impl<T: Clone> NodeMatrix<T> {
    pub(crate) fn filled(names: Vec<String>, value: T) -> Self {
        let cells = vec![value; names.len() * names.len()];
        Self { names, cells }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        // names are sorted, so binary search is fine
        self.names.binary_search_by(|n| n.as_str().cmp(name)).ok()
    }

    pub fn get(&self, row: usize, col: usize) -> &T {
        &self.cells[row * self.names.len() + col]
    }

    pub(crate) fn set(&mut self, row: usize, col: usize, value: T) {
        self.cells[row * self.names.len() + col] = value;
    }

    pub fn by_name(&self, from: &str, to: &str) -> Option<&T> {
        Some(self.get(self.index_of(from)?, self.index_of(to)?))
    }
}

/// Human-readable adjacency grid, `[xx]` for connected pairs.
impl fmt::Display for NodeMatrix<u8> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "     ")?;
        for name in &self.names {
            write!(f, "{name}    ")?;
        }
        writeln!(f)?;
        for (i, name) in self.names.iter().enumerate() {
            write!(f, " {name}")?;
            for j in 0..self.names.len() {
                if *self.get(i, j) == 1 {
                    write!(f, " [xx] ")?;
                } else {
                    write!(f, " [  ] ")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
