//! Helpers shared by the REST halves of the adapters.

use std::future::Future;

use forgeline_core::transport::{ApiRequest, ApiTransport};
use forgeline_core::{FileBlob, ForgeResult, Pipeline};
use serde::de::DeserializeOwned;

/// Parse an RFC 3339 timestamp to unix seconds, 0 when absent or invalid.
pub(crate) fn unix_timestamp(value: &str) -> i64 {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}

/// Revision to read files at: the commit, or the ref when a trigger has no SHA.
pub(crate) fn revision(pipeline: &Pipeline) -> &str {
    if pipeline.commit.is_empty() {
        &pipeline.git_ref
    } else {
        &pipeline.commit
    }
}

/// Follow `Link: rel="next"` headers until the last page.
pub(crate) async fn get_all_linked<T, F>(
    transport: &dyn ApiTransport,
    first_url: String,
    authorize: F,
) -> ForgeResult<Vec<T>>
where
    T: DeserializeOwned,
    F: Fn(ApiRequest) -> ApiRequest,
{
    let mut items = Vec::new();
    let mut url = first_url;
    loop {
        let resp = transport
            .send(authorize(ApiRequest::get(url.clone())))
            .await?
            .error_for_status()?;
        let next = resp.next_link();
        let page: Vec<T> = resp.json()?;
        items.extend(page);

        match next {
            Some(next) if next != url => url = next,
            _ => break,
        }
    }
    Ok(items)
}

/// Fetch every path concurrently; all blobs in input order, or the first error.
pub(crate) async fn fetch_all_files<F, Fut>(paths: Vec<String>, fetch: F) -> ForgeResult<Vec<FileBlob>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = ForgeResult<Vec<u8>>>,
{
    let fetches = paths.into_iter().map(|path| {
        let fut = fetch(path.clone());
        async move { fut.await.map(|data| FileBlob::new(path, data)) }
    });
    futures::future::try_join_all(fetches).await
}

/// `path/` prefix used to select tree entries below a directory.
pub(crate) fn dir_prefix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Percent-encode one URL path segment (GitLab project ids, file paths).
pub(crate) fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Percent-encode each segment of a slash-separated repository path.
pub(crate) fn encode_path(path: &str) -> String {
    path.split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeline_core::ForgeError;

    #[test]
    fn timestamps() {
        assert_eq!(unix_timestamp("2024-01-01T00:00:00Z"), 1_704_067_200);
        assert_eq!(unix_timestamp("2024-01-01T01:00:00+01:00"), 1_704_067_200);
        assert_eq!(unix_timestamp("yesterday"), 0);
    }

    #[test]
    fn prefixes() {
        assert_eq!(dir_prefix(".woodpecker"), ".woodpecker/");
        assert_eq!(dir_prefix("ci/"), "ci/");
        assert_eq!(dir_prefix(""), "");
    }

    #[test]
    fn segments() {
        assert_eq!(encode_segment("group/sub project"), "group%2Fsub%20project");
        assert_eq!(encode_path(".woodpecker/build.yml"), ".woodpecker/build.yml");
        assert_eq!(encode_path("ci/my #1.yml"), "ci/my%20%231.yml");
        assert_eq!(encode_segment("fix#1?x"), "fix%231%3Fx");
    }

    #[tokio::test]
    async fn one_failed_file_fails_the_listing() {
        let paths = vec!["a.yml".to_string(), "b.yml".to_string()];
        let result = fetch_all_files(paths, |path| async move {
            if path == "b.yml" {
                Err(ForgeError::Transient("reset".into()))
            } else {
                Ok(b"ok".to_vec())
            }
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn files_keep_input_order() {
        let paths = vec!["z.yml".to_string(), "a.yml".to_string()];
        let blobs = fetch_all_files(paths, |path| async move { Ok(path.into_bytes()) })
            .await
            .unwrap();
        assert_eq!(blobs[0].name, "z.yml");
        assert_eq!(blobs[1].data, b"a.yml");
    }
}
