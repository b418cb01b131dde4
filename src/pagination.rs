//! Page walker for WordPress collection endpoints

use reqwest::Url;
use serde::de::DeserializeOwned;

use crate::error::ApiError;
use crate::http::WpClient;

/// Records requested per page; a shorter page ends the walk.
pub const PAGE_SIZE: usize = 100;

/// Code WordPress answers with when `page` is past the last page.
const PAST_LAST_PAGE: &str = "rest_post_invalid_page_number";

/// Fetch every record of `base_url` with the given status filter.
///
/// Pages are requested in edit context until one comes back with fewer than
/// [`PAGE_SIZE`] records. Any failed page aborts the walk and discards what was
/// fetched so far.
pub async fn fetch_all_pages<T: DeserializeOwned>(
    client: &WpClient,
    base_url: &str,
    status: Option<&str>,
) -> Result<Vec<T>, ApiError> {
    let mut records = Vec::new();
    let mut page = 1;

    loop {
        let url = page_url(base_url, page, status)?;
        let batch: Vec<T> = match client.get_as(&url).await {
            Ok(batch) => batch,
            // A full final page makes us ask for one page too many.
            Err(e) if page > 1 && e.code() == Some(PAST_LAST_PAGE) => break,
            Err(e) => return Err(e),
        };

        let fetched = batch.len();
        records.extend(batch);

        tracing::debug!(url = %base_url, page, fetched, status = ?status, "Fetched page");

        if fetched < PAGE_SIZE {
            break;
        }
        page += 1;
    }

    Ok(records)
}

/// `base_url` with pagination and edit-context query parameters.
pub fn page_url(base_url: &str, page: usize, status: Option<&str>) -> Result<String, ApiError> {
    let mut url = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("per_page", &PAGE_SIZE.to_string());
        query.append_pair("context", "edit");
        query.append_pair("page", &page.to_string());
        if let Some(status) = status {
            query.append_pair("status", status);
        }
    }

    Ok(url.to_string())
}

/// `{collection}/{id}`, also for collections addressed with `?rest_route=`.
pub fn item_url(collection: &str, id: impl std::fmt::Display) -> String {
    if let Ok(mut url) = Url::parse(collection) {
        let route = url
            .query_pairs()
            .find(|(k, _)| k == "rest_route")
            .map(|(_, v)| v.into_owned());

        if let Some(route) = route {
            let others: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| k != "rest_route")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();

            let mut query = url.query_pairs_mut();
            query.clear();
            query.append_pair("rest_route", &format!("{}/{}", route.trim_end_matches('/'), id));
            for (k, v) in &others {
                query.append_pair(k, v);
            }
            drop(query);
            return url.to_string();
        }
    }

    format!("{}/{}", collection.trim_end_matches('/'), id)
}

/// `url` with a `per_page` cap, used for term lists.
pub fn capped_url(base_url: &str) -> Result<String, ApiError> {
    let mut url = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut()
        .append_pair("per_page", &PAGE_SIZE.to_string());
    Ok(url.to_string())
}
