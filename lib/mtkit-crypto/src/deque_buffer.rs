// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::ops::{Index, IndexMut};
use std::slice::SliceIndex;

/// A byte buffer that can grow on both ends.
///
/// Packets are built back to front: the body is written first, and then
/// every layer (encryption header, transport framing) prepends its own
/// header. Reserving some room at the front up-front means those headers
/// rarely need to move the body around.
#[derive(Clone, Debug)]
pub struct DequeBuffer<T: Copy + Default> {
    data: Vec<T>,
    start: usize,
    reserved_front: usize,
}

impl<T: Copy + Default> DequeBuffer<T> {
    /// Creates an empty buffer with room for `back_capacity` elements after
    /// its start and exactly `front_capacity` elements before it.
    pub fn with_capacity(back_capacity: usize, front_capacity: usize) -> Self {
        let mut data = Vec::with_capacity(front_capacity + back_capacity);
        data.resize(front_capacity, T::default());
        Self {
            data,
            start: front_capacity,
            reserved_front: front_capacity,
        }
    }

    /// Removes every element, restoring the room reserved at the front.
    pub fn clear(&mut self) {
        self.data.clear();
        self.data.resize(self.reserved_front, T::default());
        self.start = self.reserved_front;
    }

    /// Prepends a copy of `slice`.
    pub fn extend_front(&mut self, slice: &[T]) {
        if slice.len() > self.start {
            let missing = slice.len() - self.start;
            self.data.splice(0..0, std::iter::repeat(T::default()).take(missing));
            self.start += missing;
        }
        self.start -= slice.len();
        self.data[self.start..self.start + slice.len()].copy_from_slice(slice);
    }

    /// Appends a single element.
    pub fn push(&mut self, value: T) {
        self.data.push(value);
    }

    /// Shortens the buffer to `len` elements, dropping from the back.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(self.start + len);
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }
}

impl<T: Copy + Default> AsRef<[T]> for DequeBuffer<T> {
    fn as_ref(&self) -> &[T] {
        &self.data[self.start..]
    }
}

impl<T: Copy + Default> AsMut<[T]> for DequeBuffer<T> {
    fn as_mut(&mut self) -> &mut [T] {
        &mut self.data[self.start..]
    }
}

impl<T: Copy + Default, I: SliceIndex<[T]>> Index<I> for DequeBuffer<T> {
    type Output = I::Output;

    fn index(&self, index: I) -> &Self::Output {
        &self.as_ref()[index]
    }
}

impl<T: Copy + Default, I: SliceIndex<[T]>> IndexMut<I> for DequeBuffer<T> {
    fn index_mut(&mut self, index: I) -> &mut Self::Output {
        &mut self.as_mut()[index]
    }
}

impl<T: Copy + Default> Extend<T> for DequeBuffer<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.data.extend(iter)
    }
}

impl<'a, T: Copy + Default + 'a> Extend<&'a T> for DequeBuffer<T> {
    fn extend<I: IntoIterator<Item = &'a T>>(&mut self, iter: I) {
        self.data.extend(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_regardless_of_reserved_room() {
        for (back, front) in [(0, 0), (0, 4), (4, 0), (2, 4)] {
            let buffer = DequeBuffer::<u8>::with_capacity(back, front);
            assert!(buffer.is_empty());
            assert_eq!(buffer.as_ref(), &[] as &[u8]);
        }
    }

    #[test]
    fn front_grows_past_reserved_room() {
        let mut buffer = DequeBuffer::<u8>::with_capacity(2, 4);
        buffer.extend_front(&[3, 3, 3]);
        assert_eq!(buffer.as_ref(), &[3, 3, 3]);

        buffer.extend_front(&[1]);
        assert_eq!(buffer.as_ref(), &[1, 3, 3, 3]);

        buffer.extend_front(&[2, 2]);
        assert_eq!(buffer.as_ref(), &[2, 2, 1, 3, 3, 3]);
        assert_eq!(buffer.len(), 6);
    }

    #[test]
    fn both_ends_and_clear() {
        let mut buffer = DequeBuffer::<u8>::with_capacity(6, 4);
        buffer.extend(1..=2);
        buffer.push(3);
        buffer.extend_front(&[0]);
        buffer.extend(&[4, 5]);
        assert_eq!(buffer.as_ref(), &[0, 1, 2, 3, 4, 5]);

        buffer[1..3].copy_from_slice(&[9, 9]);
        assert_eq!(buffer[..4], [0, 9, 9, 3]);

        buffer.truncate(2);
        assert_eq!(buffer.as_ref(), &[0, 9]);

        buffer.clear();
        assert!(buffer.is_empty());
        buffer.extend_front(&[7; 4]);
        assert_eq!(buffer.as_ref(), &[7; 4]);
    }
}
