use crate::extract::PageMeta;
use crate::fetch::RequestDescriptor;
use crate::pagination::PageUrlBuilder;
use std::collections::HashSet;

/// Lazy planner for cursor-paginated sites
///
/// Each descriptor is produced only after the preceding page's metadata
/// has been fed back through [`CursorPlanner::advance`]. The chain ends
/// when a page carries no cursor, a cursor repeats, or the page limit is
/// reached.
#[derive(Debug, Clone)]
pub struct CursorPlanner {
    seed: RequestDescriptor,
    paging: PageUrlBuilder,
    limit: usize,
    issued: usize,
    pending: Option<String>,
    seen: HashSet<String>,
}

impl CursorPlanner {
    /// Creates a planner starting from the seed page's cursor
    ///
    /// `limit` counts pages including the seed. A `paging` policy that is
    /// not a cursor policy produces no descriptors.
    pub fn new(
        seed: RequestDescriptor,
        paging: PageUrlBuilder,
        limit: usize,
        first_cursor: Option<String>,
    ) -> Self {
        let mut planner = Self {
            seed,
            paging,
            limit,
            issued: 0,
            pending: None,
            seen: HashSet::new(),
        };
        planner.accept(first_cursor);
        planner
    }

    /// Maximum number of pages, seed included
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of follow-up descriptors produced so far
    pub fn issued(&self) -> usize {
        self.issued
    }

    /// Whether another descriptor could be produced right now
    pub fn has_next(&self) -> bool {
        self.pending.is_some() && 1 + self.issued < self.limit
    }

    /// Produces the descriptor for the next page
    pub fn next_descriptor(&mut self) -> Option<RequestDescriptor> {
        if 1 + self.issued >= self.limit {
            return None;
        }

        let cursor = self.pending.take()?;
        let url = self.paging.cursor_url(self.seed.url(), &cursor)?;
        self.issued += 1;
        Some(self.seed.for_url(url))
    }

    /// Feeds back the metadata of the page just parsed
    pub fn advance(&mut self, meta: &PageMeta) {
        self.accept(meta.next_page_cursor.clone());
    }

    /// Ends the chain; used when a page fails and yields no cursor
    pub fn stop(&mut self) {
        self.pending = None;
    }

    fn accept(&mut self, cursor: Option<String>) {
        self.pending = cursor.filter(|c| !c.is_empty() && self.seen.insert(c.clone()));
    }
}
