/// Number that identifies an object.
///
/// Global object numbers index the descriptor table of a global context.
/// Client object numbers index the translation table of a client context.
/// Numbers from different contexts must never be mixed.
pub type ObjNum = u16;

/// The object number that denotes "no object".
pub const OBJNUM_INVALID: ObjNum = ObjNum::MAX;

/// Log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = 8;

/// Number of descriptors in a descriptor page,
/// and number of entries in a client translation page.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Upper bound on the number of pages of either kind.
///
/// Keeps the last object number of the last page
/// below [`OBJNUM_INVALID`].
pub const MAX_PAGES: usize = (OBJNUM_INVALID as usize) >> PAGE_SHIFT;

/// Split an object number into a page index and an index within the page.
pub (crate) fn page_index(objnum: ObjNum) -> (usize, usize)
{
    let objnum = usize::from(objnum);
    (objnum >> PAGE_SHIFT, objnum & (PAGE_SIZE - 1))
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest};

    #[test]
    fn invalid_is_unreachable_within_page_limit()
    {
        let last = MAX_PAGES * PAGE_SIZE - 1;
        assert!(last < usize::from(OBJNUM_INVALID));
    }

    proptest!
    {
        #[test]
        fn page_index_round_trips(objnum: ObjNum)
        {
            let (page, index) = page_index(objnum);
            assert_eq!(page * PAGE_SIZE + index, usize::from(objnum));
            assert!(index < PAGE_SIZE);
        }
    }
}
