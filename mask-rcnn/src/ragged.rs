//! Variable-length sequences packed into one flat buffer.

use crate::common::*;

/// A sequence of sequences stored as `(offsets, flat data)`.
///
/// Group `i` occupies `data[offsets[i]..offsets[i + 1]]`. It backs per-image
/// and per-level collections whose lengths differ.
#[derive(Debug, Clone, PartialEq)]
pub struct Ragged<T> {
    offsets: Vec<usize>,
    data: Vec<T>,
}

impl<T> Default for Ragged<T> {
    fn default() -> Self {
        Self {
            offsets: vec![0],
            data: vec![],
        }
    }
}

impl<T> Ragged<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds from flat data and the length of each group.
    pub fn from_lengths(data: Vec<T>, lengths: &[usize]) -> Result<Self> {
        let total: usize = lengths.iter().sum();
        ensure!(
            total == data.len(),
            "group lengths sum to {}, but the flat data has {} elements",
            total,
            data.len()
        );

        let offsets: Vec<_> = iter::once(0)
            .chain(lengths.iter().scan(0, |acc, &len| {
                *acc += len;
                Some(*acc)
            }))
            .collect();

        Ok(Self { offsets, data })
    }

    pub fn push_group<I>(&mut self, group: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.data.extend(group);
        self.offsets.push(self.data.len());
    }

    pub fn num_groups(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.num_groups() == 0
    }

    pub fn flat_len(&self) -> usize {
        self.data.len()
    }

    pub fn lengths(&self) -> Vec<usize> {
        self.offsets
            .iter()
            .tuple_windows()
            .map(|(begin, end)| end - begin)
            .collect()
    }

    pub fn range(&self, index: usize) -> Option<Range<usize>> {
        let begin = *self.offsets.get(index)?;
        let end = *self.offsets.get(index + 1)?;
        Some(begin..end)
    }

    pub fn get(&self, index: usize) -> Option<&[T]> {
        let range = self.range(index)?;
        Some(&self.data[range])
    }

    pub fn iter(&self) -> impl Iterator<Item = &[T]> + Clone + '_ {
        self.offsets
            .iter()
            .tuple_windows()
            .map(move |(&begin, &end)| &self.data[begin..end])
    }

    pub fn flat(&self) -> &[T] {
        &self.data
    }

    pub fn into_flat(self) -> Vec<T> {
        self.data
    }

    /// Checks that this collection has the same group layout as `other`.
    pub fn ensure_same_layout<U>(&self, other: &Ragged<U>, what: &str) -> Result<()> {
        ensure!(
            self.offsets == other.offsets,
            "{}: group lengths {:?} and {:?} do not match",
            what,
            self.lengths(),
            other.lengths()
        );
        Ok(())
    }

    pub fn map<U, F>(&self, f: F) -> Ragged<U>
    where
        F: FnMut(&T) -> U,
    {
        Ragged {
            offsets: self.offsets.clone(),
            data: self.data.iter().map(f).collect(),
        }
    }
}

impl<T> FromIterator<Vec<T>> for Ragged<T> {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Vec<T>>,
    {
        let mut ragged = Self::new();
        iter.into_iter().for_each(|group| ragged.push_group(group));
        ragged
    }
}
