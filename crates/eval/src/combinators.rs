//! Reactive combinators.
//!
//! `combine_latest` is the engine's only cross-stream combinator: a
//! composite stream expression combines the latest value of each of its
//! inputs. The rules match the evaluation contract:
//!
//! - nothing is emitted until every input has produced at least one value
//! - an input emitting an error value just occupies its slot with that
//!   error; the combination keeps flowing
//! - an input completing normally retains its last value
//! - the combination completes when all inputs have completed

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;

/// Combine the latest values of all input streams.
///
/// With no inputs, emits one empty snapshot and completes.
pub fn combine_latest<T: Clone + Send + 'static>(
    streams: Vec<BoxStream<'static, T>>,
) -> BoxStream<'static, Vec<T>> {
    let len = streams.len();
    if len == 0 {
        return Box::pin(futures::stream::once(async { Vec::new() }));
    }
    let indexed: Vec<BoxStream<'static, (usize, T)>> = streams
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.map(move |item| (i, item)).boxed())
        .collect();
    let mut merged = futures::stream::select_all(indexed);
    Box::pin(stream! {
        let mut latest: Vec<Option<T>> = vec![None; len];
        while let Some((i, item)) = merged.next().await {
            latest[i] = Some(item);
            let snapshot: Vec<T> = latest.iter().filter_map(Clone::clone).collect();
            if snapshot.len() == len {
                yield snapshot;
            }
        }
    })
}
