//! Heap storage for the arrays allocated by running programs.

/// Handle to one heap array. On the operand stack a handle travels as a
/// plain `i32` indistinguishable from any other integer; the wrapper exists
/// so the reinterpretation is explicit at the heap boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ArrayRef(i32);

impl ArrayRef {
    /// Reinterprets an operand-stack value as an array handle.
    #[must_use]
    pub fn from_value(value: i32) -> Self {
        Self(value)
    }

    /// Returns the handle as an operand-stack value.
    #[must_use]
    pub fn value(self) -> i32 {
        self.0
    }
}

/// Append-only store of integer arrays. Arrays live for the whole process,
/// there is no garbage collection.
///
/// Array layout: slot 0 holds the element count, the elements occupy slots
/// `1..=count`.
#[derive(Debug, Default)]
pub struct Heap {
    arrays: Vec<Vec<i32>>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self { arrays: Vec::new() }
    }

    /// Allocates a zero-filled array of `count` elements and returns its
    /// handle.
    ///
    /// # Panics
    /// Panics if `count` is negative.
    pub fn allocate(&mut self, count: i32) -> ArrayRef {
        assert!(count >= 0, "negative array length {count}");
        let mut array = vec![0; count as usize + 1];
        array[0] = count;
        self.arrays.push(array);
        ArrayRef(self.arrays.len() as i32 - 1)
    }

    /// Returns the slots of the array behind `handle`.
    ///
    /// # Panics
    /// Panics if `handle` was not produced by a prior allocation.
    #[must_use]
    pub fn array(&self, handle: ArrayRef) -> &[i32] {
        &self.arrays[handle.0 as usize]
    }

    /// Returns the slots of the array behind `handle` for writing.
    ///
    /// # Panics
    /// Panics if `handle` was not produced by a prior allocation.
    pub fn array_mut(&mut self, handle: ArrayRef) -> &mut [i32] {
        &mut self.arrays[handle.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_zeroed_array_with_length_slot() {
        let mut heap = Heap::new();
        let handle = heap.allocate(4);
        assert_eq!(heap.array(handle), &[4, 0, 0, 0, 0]);
    }

    #[test]
    fn allocates_empty_array() {
        let mut heap = Heap::new();
        let handle = heap.allocate(0);
        assert_eq!(heap.array(handle), &[0]);
    }

    #[test]
    fn writes_survive_later_allocations() {
        let mut heap = Heap::new();
        let first = heap.allocate(2);
        heap.array_mut(first)[1] = 11;
        heap.array_mut(first)[2] = 22;
        let second = heap.allocate(1);
        heap.array_mut(second)[1] = 33;
        assert_eq!(heap.array(first), &[2, 11, 22]);
        assert_eq!(heap.array(second), &[1, 33]);
    }

    #[test]
    fn handles_round_trip_through_stack_values() {
        let mut heap = Heap::new();
        let handle = heap.allocate(1);
        let as_value = handle.value();
        assert_eq!(ArrayRef::from_value(as_value), handle);
    }

    #[test]
    #[should_panic(expected = "negative array length")]
    fn rejects_negative_length() {
        let mut heap = Heap::new();
        let _ = heap.allocate(-1);
    }

    #[test]
    #[should_panic(expected = "index out of bounds")]
    fn rejects_unallocated_handle() {
        let heap = Heap::new();
        let _ = heap.array(ArrayRef::from_value(0));
    }
}
