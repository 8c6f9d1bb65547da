//! Page offsets covering a probed total.

/// Pages `0..pages()` at offsets `0, page_size, 2 * page_size, ...` below
/// `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
    total: u64,
    page_size: u64,
}

impl PagePlan {
    /// Plan pages of `page_size` features over `total` features.
    ///
    /// `page_size` must be positive.
    #[must_use]
    pub const fn new(total: u64, page_size: u64) -> Self {
        Self { total, page_size }
    }

    /// Features the plan covers.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Number of pages.
    #[must_use]
    pub const fn pages(&self) -> u64 {
        self.total.div_ceil(self.page_size)
    }

    /// `(page_index, start_index)` pairs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + Send + 'static {
        let page_size = self.page_size;
        (0..self.pages()).map(move |page| (page, page * page_size))
    }
}
