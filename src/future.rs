use std::future::Future;

/// Like futures::future::select_ok, but evaluates each future sequentially, instead of in parallel.
///
/// `empty` supplies the error when the iterator yields nothing.
pub async fn first_ok<T, E, F>(
    iter: impl IntoIterator<Item = F>,
    empty: impl FnOnce() -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let mut last_error = None;
    for fut in iter {
        match fut.await {
            Ok(x) => return Ok(x),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(empty))
}
