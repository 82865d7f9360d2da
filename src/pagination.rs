//! A lazy, cursor-driven async sequence for paginated list operations
//! (`session/list`, and any future paginated method).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::Stream;

/// One page of results plus an optional cursor for the next page. `None`
/// means this was the last page.
pub struct Page<T> {
    /// The items in this page.
    pub items: Vec<T>,
    /// The cursor to request the next page, if any remain.
    pub next_cursor: Option<String>,
}

type FetchFuture<T, E> = Pin<Box<dyn Future<Output = Result<Page<T>, E>> + Send>>;

/// A single-iteration [`Stream`] over pages of `T`, fetched lazily via a
/// caller-supplied async closure `(cursor) -> next page`.
///
/// Each call to `poll_next` either returns a buffered item from the current
/// page or, once the buffer is empty, invokes the fetch closure for the next
/// page. The sequence ends when a page's `next_cursor` is `None`.
pub struct PaginatedAsyncSequence<T, F> {
    fetch: F,
    cursor: Option<String>,
    buffered: std::collections::VecDeque<T>,
    exhausted: bool,
    in_flight: Option<FetchFuture<T, crate::error::ConnectionError>>,
}

impl<T, F, Fut> PaginatedAsyncSequence<T, F>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, crate::error::ConnectionError>> + Send + 'static,
{
    /// Build a sequence that starts at the first page (`cursor = None`).
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            cursor: None,
            buffered: std::collections::VecDeque::new(),
            exhausted: false,
            in_flight: None,
        }
    }
}

impl<T, F, Fut> Stream for PaginatedAsyncSequence<T, F>
where
    T: Unpin,
    F: FnMut(Option<String>) -> Fut + Unpin,
    Fut: Future<Output = Result<Page<T>, crate::error::ConnectionError>> + Send + 'static,
{
    type Item = Result<T, crate::error::ConnectionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(item) = this.buffered.pop_front() {
            return Poll::Ready(Some(Ok(item)));
        }

        if this.exhausted {
            return Poll::Ready(None);
        }

        if this.in_flight.is_none() {
            let cursor = this.cursor.clone();
            this.in_flight = Some(Box::pin((this.fetch)(cursor)));
        }

        let Some(future) = this.in_flight.as_mut() else {
            return Poll::Ready(None);
        };
        match future.as_mut().poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                this.in_flight = None;
                match result {
                    Ok(page) => {
                        this.cursor = page.next_cursor.clone();
                        this.exhausted = page.next_cursor.is_none();
                        this.buffered.extend(page.items);
                        match this.buffered.pop_front() {
                            Some(item) => Poll::Ready(Some(Ok(item))),
                            None => Poll::Ready(None),
                        }
                    }
                    Err(error) => {
                        this.exhausted = true;
                        Poll::Ready(Some(Err(error)))
                    }
                }
            }
        }
    }
}
