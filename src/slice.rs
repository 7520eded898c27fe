pub(crate) fn take_first_mut<'t, T>(data: &mut &'t mut [T]) -> Option<&'t mut T> {
    data.split_off_first_mut()
}

/// Removes `prefix` elements from `data` and returns them, or `None` if
/// fewer are available.
pub(crate) fn try_slice_take_prefix_mut<'t, T>(
    data: &mut &'t mut [T],
    prefix: usize,
) -> Option<&'t mut [T]> {
    data.split_off_mut(..prefix)
}
