//! Paginated listing into resources.
//!
//! One [`ObjectStore::list`](ossdav_storage::ObjectStore::list) call returns a
//! single page. [`pages`] follows the continuation marker until the backend
//! stops returning one, and [`list`] merges every page's objects and common
//! prefixes into one materialized sequence.

use crate::error::{ErrorKind, Result};
use crate::resource::Resource;
use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, TryStreamExt};
use ossdav_storage::{BackendHandle, ListPage, ListRequest};
use std::collections::HashSet;

/// Complete result of a listing.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Objects then common prefixes of each page, pages in order.
    pub resources: Vec<Resource>,
    /// Set when any page carried the backend's not-found status. Objects
    /// returned before that are still in `resources`.
    pub not_found: bool,
}
impl Listing {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Object-store keys of every resource.
    pub fn keys(&self) -> Vec<String> {
        self.resources.iter().map(|resource| resource.path.clone()).collect()
    }
}

/// Stream every page of a listing, strictly one call after the other.
///
/// A backend that hands back a continuation marker it has already returned
/// would loop forever; that is logged and treated as the end of the listing.
pub fn pages<'a>(backend: &'a BackendHandle, request: ListRequest) -> impl Stream<Item = Result<ListPage>> + 'a {
    stream! {
        let mut request = request;
        let mut seen: HashSet<String> = request.marker.iter().cloned().collect();
        loop {
            let page = match backend.list(&request).await.or_raise(|| ErrorKind::Backend) {
                Ok(page) => page,
                Err(err) => {
                    yield Err(err);
                    break;
                },
            };
            let next = page.next_marker.clone();
            yield Ok(page);
            match next {
                Some(marker) if seen.insert(marker.clone()) => request.marker = Some(marker),
                Some(marker) => {
                    tracing::warn!(backend = backend.name(), marker = %marker, "Listing repeated a continuation marker; stopping");
                    break;
                },
                None => break,
            }
        }
    }
}

/// Collect every page of a listing into resources.
pub async fn list(backend: &BackendHandle, request: ListRequest) -> Result<Listing> {
    let mut listing = Listing::default();
    let mut page_count = 0usize;
    let stream = pages(backend, request);
    futures::pin_mut!(stream);
    while let Some(page) = stream.try_next().await? {
        page_count += 1;
        listing.not_found |= page.not_found;
        listing.resources.extend(page.objects.iter().map(Resource::from_entry));
        listing.resources.extend(page.prefixes.iter().map(|prefix| Resource::from_prefix(prefix)));
    }
    tracing::debug!(pages = page_count, resources = listing.resources.len(), "Listing complete");
    Ok(listing)
}
