// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! A lazy, single-pass paginated iterator over a cursor-based list endpoint.

use std::time::Duration;

use futures_util::Stream;

use crate::error::Error;

/// Describes one paginated collection: how to fetch a page, how to read items and the
/// continuation cursor out of it, and how to install a cursor back onto the request.
pub trait PageSource {
    /// The request value threaded through successive fetches.
    type Request: Clone;
    /// One page of results.
    type Page;
    /// The item type yielded to callers.
    type Item;

    /// Fetches the page for `request`, or `None` if the endpoint has nothing to return.
    fn fetch(
        &self,
        request: Self::Request,
    ) -> impl std::future::Future<Output = Result<Option<Self::Page>, Error>> + Send;

    /// The items carried by `page`, in server order.
    fn items(&self, page: &Self::Page) -> Vec<Self::Item>;

    /// The continuation cursor carried by `page`, if the sequence continues.
    fn cursor(&self, page: &Self::Page) -> Option<String>;

    /// Installs `cursor` onto `request` for the next fetch.
    fn with_cursor(&self, request: Self::Request, cursor: Option<String>) -> Self::Request;
}

/// Builds a lazy, single-pass stream of items over `source`, starting from `initial`.
///
/// First access fetches the initial page; an absent page yields an empty sequence. Within a
/// page, items are yielded in the page's own order. On page exhaustion, a continuation cursor
/// triggers the next fetch; its absence ends the sequence. An error carrying a `Retry-After` is
/// recovered locally: the iterator sleeps for that duration and retries the same fetch. Any
/// other error ends the sequence after yielding it.
pub fn paginate<S>(source: S, initial: S::Request) -> impl Stream<Item = Result<S::Item, Error>>
where
    S: PageSource,
    S::Request: Send,
    S::Page: Send,
    S::Item: Send,
{
    async_stream::try_stream! {
        let mut request = Some(initial);

        while let Some(req) = request.take() {
            let page = loop {
                match source.fetch(req.clone()).await {
                    Ok(page) => break page,
                    Err(err) => {
                        if let Some(delay) = err.retry_after() {
                            sleep(delay).await;
                            continue;
                        }
                        Err(err)?;
                        unreachable!("propagated above");
                    }
                }
            };

            let Some(page) = page else {
                break;
            };

            let cursor = source.cursor(&page);
            for item in source.items(&page) {
                yield item;
            }

            match cursor {
                Some(cursor) => request = Some(source.with_cursor(req, Some(cursor))),
                None => break,
            }
        }
    }
}

async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::StreamExt;

    use super::*;
    use crate::error::ErrorKind;

    struct Page {
        items: Vec<u32>,
        next: Option<String>,
    }

    struct FakeSource {
        pages: Vec<Option<Page>>,
        calls: AtomicUsize,
    }

    impl PageSource for FakeSource {
        type Request = Option<String>;
        type Page = Page;
        type Item = u32;

        async fn fetch(&self, _request: Self::Request) -> Result<Option<Self::Page>, Error> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pages.get(index).and_then(|p| p.as_ref()).map(|p| Page {
                items: p.items.clone(),
                next: p.next.clone(),
            }))
        }

        fn items(&self, page: &Self::Page) -> Vec<Self::Item> {
            page.items.clone()
        }

        fn cursor(&self, page: &Self::Page) -> Option<String> {
            page.next.clone()
        }

        fn with_cursor(&self, _request: Self::Request, cursor: Option<String>) -> Self::Request {
            cursor
        }
    }

    #[tokio::test]
    async fn yields_items_across_pages_in_order() {
        let source = FakeSource {
            pages: vec![
                Some(Page { items: vec![1, 2], next: Some("cursor-1".to_string()) }),
                Some(Page { items: vec![3], next: None }),
            ],
            calls: AtomicUsize::new(0),
        };

        let items: Vec<u32> = paginate(source, None).map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn absent_initial_page_yields_empty_sequence() {
        let source = FakeSource { pages: vec![None], calls: AtomicUsize::new(0) };
        let items: Vec<u32> = paginate(source, None).map(|r| r.unwrap()).collect().await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn empty_page_with_cursor_is_skipped_transparently() {
        let source = FakeSource {
            pages: vec![
                Some(Page { items: vec![], next: Some("cursor-1".to_string()) }),
                Some(Page { items: vec![42], next: None }),
            ],
            calls: AtomicUsize::new(0),
        };

        let items: Vec<u32> = paginate(source, None).map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec![42]);
    }

    #[tokio::test]
    async fn non_retry_error_propagates_and_ends_sequence() {
        struct FailingSource;
        impl PageSource for FailingSource {
            type Request = ();
            type Page = Page;
            type Item = u32;

            async fn fetch(&self, _request: Self::Request) -> Result<Option<Self::Page>, Error> {
                Err(Error::new(ErrorKind::Server, "boom"))
            }
            fn items(&self, page: &Self::Page) -> Vec<Self::Item> {
                page.items.clone()
            }
            fn cursor(&self, page: &Self::Page) -> Option<String> {
                page.next.clone()
            }
            fn with_cursor(&self, request: Self::Request, _cursor: Option<String>) -> Self::Request {
                request
            }
        }

        let results: Vec<Result<u32, Error>> = paginate(FailingSource, ()).collect().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }
}
