//! Placement math for mixin buffers.
//!
//! Every mixin instance lives in a buffer with a pointer-sized slot in front
//! of it. The slot holds the back-reference to the owning object, so code
//! that only has a pointer to the mixin can still find its object:
//!
//! ```text
//! buffer                      buffer + offset
//! |<-- padding -->|<-- back-ref -->|<-- mixin (size, aligned) -->|
//! ```
//!
//! The functions here are pure. They do not allocate and they never look at
//! the memory they describe.

/// Size of the back-reference slot that precedes each mixin instance.
pub const BACK_REFERENCE_SIZE: usize = size_of::<*const ()>();

/// Returns `true` if `alignment` is a non-zero power of two.
#[inline]
#[must_use]
pub const fn is_valid_alignment(alignment: usize) -> bool {
    alignment.is_power_of_two()
}

/// Rounds `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two. Saturates instead of wrapping, so an
/// absurd request yields a size no allocator will satisfy.
#[inline]
#[must_use]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    let mask = alignment - 1;
    match value.checked_add(mask) {
        Some(bumped) => bumped & !mask,
        None => usize::MAX & !mask,
    }
}

/// Minimum buffer size that fits a mixin of `size` bytes aligned to
/// `alignment`, plus its back-reference, wherever the buffer happens to start.
///
/// The worst case start address needs `alignment - 1` bytes of padding on top
/// of the back-reference slot.
///
/// ```
/// use amalgam_mem::layout::{calculate_mem_size_for_mixin, BACK_REFERENCE_SIZE};
///
/// assert_eq!(calculate_mem_size_for_mixin(12, 4), 12 + 4 + BACK_REFERENCE_SIZE - 1);
/// ```
#[inline]
#[must_use]
pub const fn calculate_mem_size_for_mixin(size: usize, alignment: usize) -> usize {
    size.saturating_add(alignment)
        .saturating_add(BACK_REFERENCE_SIZE)
        .saturating_sub(1)
}

/// Offset of the mixin inside a buffer starting at `buffer`.
///
/// The result is the smallest offset not less than [`BACK_REFERENCE_SIZE`]
/// for which `buffer + offset` is a multiple of `alignment`. It never exceeds
/// `BACK_REFERENCE_SIZE + alignment - 1`, which is why
/// [`calculate_mem_size_for_mixin`] is always large enough.
///
/// ```
/// use amalgam_mem::layout::{calculate_mixin_offset, BACK_REFERENCE_SIZE};
///
/// let buf = [0u8; 64];
/// let offset = calculate_mixin_offset(buf.as_ptr(), 16);
/// assert!(offset >= BACK_REFERENCE_SIZE);
/// assert_eq!((buf.as_ptr() as usize + offset) % 16, 0);
/// ```
#[inline]
#[must_use]
pub fn calculate_mixin_offset(buffer: *const u8, alignment: usize) -> usize {
    offset_for_address(buffer.addr(), alignment)
}

/// Address-only form of [`calculate_mixin_offset`].
#[inline]
#[must_use]
pub const fn offset_for_address(address: usize, alignment: usize) -> usize {
    align_up(address.saturating_add(BACK_REFERENCE_SIZE), alignment) - address
}

/// Checks that `offset` is a valid placement for a mixin in `buffer`.
///
/// Used to validate what a user-supplied allocator hands back.
#[inline]
#[must_use]
pub fn is_valid_placement(buffer: *const u8, offset: usize, alignment: usize) -> bool {
    offset >= BACK_REFERENCE_SIZE
        && is_valid_alignment(alignment)
        && buffer.addr().wrapping_add(offset) % alignment == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 1), 9);
        assert_eq!(align_up(usize::MAX, 16), usize::MAX & !15);
    }

    #[test]
    fn test_offset_already_aligned_start() {
        // A 64-aligned buffer still needs room for the back-reference.
        assert_eq!(offset_for_address(64, 64), 64);
        assert_eq!(offset_for_address(64, 1), BACK_REFERENCE_SIZE);
        assert_eq!(offset_for_address(64, BACK_REFERENCE_SIZE), BACK_REFERENCE_SIZE);
    }

    #[test]
    fn test_offset_unaligned_start() {
        let offset = offset_for_address(3, 16);
        assert_eq!((3 + offset) % 16, 0);
        assert!(offset >= BACK_REFERENCE_SIZE);
        assert!(offset < BACK_REFERENCE_SIZE + 16);
    }

    #[test]
    fn test_zero_sized_mixin_still_has_room() {
        assert!(calculate_mem_size_for_mixin(0, 1) >= BACK_REFERENCE_SIZE);
    }

    #[test]
    fn test_placement_validation() {
        let buf = [0u8; 128];
        let offset = calculate_mixin_offset(buf.as_ptr(), 32);
        assert!(is_valid_placement(buf.as_ptr(), offset, 32));
        assert!(!is_valid_placement(buf.as_ptr(), 0, 1));
        assert!(!is_valid_placement(buf.as_ptr(), offset, 3));
    }

    proptest! {
        #[test]
        fn prop_offset_fits_in_computed_size(
            address in 0usize..(1 << 40),
            size in 0usize..4096,
            shift in 0u32..12,
        ) {
            let alignment = 1usize << shift;
            let mem_size = calculate_mem_size_for_mixin(size, alignment);
            let offset = offset_for_address(address, alignment);

            prop_assert_eq!((address + offset) % alignment, 0);
            prop_assert!(offset >= BACK_REFERENCE_SIZE);
            prop_assert!(offset + size <= mem_size);
        }
    }
}
