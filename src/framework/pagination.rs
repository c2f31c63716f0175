//! Pagination engine
//!
//! Drives a page source to completion under one of four protocols.
//! `[i, j)` below means from index `i` inclusive to `j` exclusive.
//!
//! - `offset_limit`: items `[offset, offset + limit)`, offset starts at 0.
//!   The page index sent is the offset.
//! - `page_size`: items `[(page - 1) * size, page * size)`, page starts at 1.
//!   The page index sent is `offset / limit + 1`.
//! - `marker`: empty marker on the first page, then the next marker returned
//!   by the previous page until it comes back empty.
//! - `no_pagination`: one call returns everything.
//!
//! For the two counted styles the loop stops on a short page, or once the
//! accumulated count reaches the total reported by the cloud (a negative
//! total means "not reported" and only the short-page rule applies).

use super::params::{add_param_int, add_param_string, ParamMap};
use crate::definition::{ConfPaginator, PaginationType, ParamType};
use crate::error::{Error, Result};
use crate::jsonpath;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};

pub const DEFAULT_PAGE_SIZE: i64 = 10;

static PAGE_SIZE: AtomicI64 = AtomicI64::new(DEFAULT_PAGE_SIZE);

/// Set the process-wide page size; non-positive values restore the default
pub fn set_page_size(size: i64) {
    let size = if size <= 0 { DEFAULT_PAGE_SIZE } else { size };
    PAGE_SIZE.store(size, Ordering::Relaxed);
}

pub fn page_size() -> i64 {
    PAGE_SIZE.load(Ordering::Relaxed)
}

/// Continuation signal of one page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NextCondition {
    /// Total items reported by the cloud, negative if not reported
    pub total_count: i64,
    /// Marker of the next page, empty when done
    pub next_marker: String,
}

/// Source of one page of raw documents
#[async_trait]
pub trait Paginator: Send + Sync {
    async fn get_one_page(&self, params: ParamMap) -> Result<(Vec<Value>, NextCondition)>;
}

/// Fetch every page with the process-wide page size
pub async fn get_entire_list<P>(paginator: &P, conf: &ConfPaginator) -> Result<Vec<Value>>
where
    P: Paginator + ?Sized,
{
    get_entire_list_sized(paginator, conf, page_size()).await
}

/// Fetch every page and concatenate them in page order
///
/// A page failing because the cloud has no credentials configured ends the
/// whole call with an empty list.
pub async fn get_entire_list_sized<P>(
    paginator: &P,
    conf: &ConfPaginator,
    page_size: i64,
) -> Result<Vec<Value>>
where
    P: Paginator + ?Sized,
{
    match conf.pagination_type {
        PaginationType::Unset => {
            return Err(Error::Config("pagination type not set".to_string()));
        }
        PaginationType::NoPagination => {
            return match paginator.get_one_page(ParamMap::new()).await {
                Ok((data, _)) => Ok(data),
                Err(e) if e.is_not_configured() => {
                    tracing::debug!("Bypass listing: {}", e);
                    Ok(Vec::new())
                }
                Err(e) => Err(e),
            };
        }
        _ => {}
    }

    let limit = if page_size <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size
    };
    let mut offset: i64 = 0;
    let mut marker = String::new();
    let mut params = ParamMap::new();
    let mut full_list = Vec::new();

    loop {
        let page_index = match conf.pagination_type {
            PaginationType::PageSize => offset / limit + 1,
            _ => offset,
        };

        if !conf.offset_name.is_empty() {
            add_param_int(&mut params, &conf.offset_name, page_index, conf.offset_type)?;
        }
        if !conf.limit_name.is_empty() {
            add_param_int(&mut params, &conf.limit_name, limit, conf.limit_type)?;
        }
        if !conf.marker_name.is_empty() {
            add_param_string(&mut params, &conf.marker_name, &marker, Some(ParamType::String))?;
        }

        let (page, next) = match paginator.get_one_page(params.clone()).await {
            Ok(result) => result,
            Err(e) if e.is_not_configured() => {
                tracing::debug!("Bypass listing: {}", e);
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::Page {
                    offset,
                    limit,
                    source: Box::new(e),
                })
            }
        };

        let page_len = page.len() as i64;
        full_list.extend(page);

        match conf.pagination_type {
            PaginationType::OffsetLimit | PaginationType::PageSize => {
                // The list may change while paging, so a count differing from
                // the reported total is tolerated
                if page_len < limit
                    || (next.total_count >= 0 && full_list.len() as i64 >= next.total_count)
                {
                    break;
                }
            }
            PaginationType::Marker => {
                if next.next_marker.is_empty() {
                    break;
                }
                marker = next.next_marker;
            }
            _ => break,
        }

        offset += limit;
    }

    tracing::debug!("Listed {} items in {} pages", full_list.len(), offset / limit + 1);
    Ok(full_list)
}

/// Split a page response into its data list and continuation signal
pub fn result_data_parse(
    result: &Value,
    conf: &ConfPaginator,
    data_list_json_path: &str,
    convert_object_to_list: bool,
) -> Result<(Vec<Value>, NextCondition)> {
    let data_list = || {
        jsonpath::query_list(result, data_list_json_path, convert_object_to_list)
            .map_err(|e| Error::Response(format!("failed to convert to list: {}", e)))
    };

    match conf.pagination_type {
        PaginationType::OffsetLimit | PaginationType::PageSize => {
            let fields = as_object(result)?;
            let total = fields.get(&conf.resp_total_name).ok_or_else(|| {
                Error::Response(format!("missing key \"{}\"", conf.resp_total_name))
            })?;
            let total_count = total.as_i64().ok_or_else(|| {
                Error::Response(format!(
                    "failed to convert \"{}\" to int: {}",
                    conf.resp_total_name, total
                ))
            })?;

            Ok((
                data_list()?,
                NextCondition {
                    total_count,
                    ..Default::default()
                },
            ))
        }
        PaginationType::NoPagination => {
            let list = data_list()?;
            let total_count = list.len() as i64;
            Ok((
                list,
                NextCondition {
                    total_count,
                    ..Default::default()
                },
            ))
        }
        PaginationType::Marker => {
            let fields = as_object(result)?;

            let is_truncated = if conf.truncated_name.is_empty() {
                true
            } else {
                let truncated = fields.get(&conf.truncated_name).ok_or_else(|| {
                    Error::Response(format!("missing key \"{}\"", conf.truncated_name))
                })?;
                truncated.as_bool().ok_or_else(|| {
                    Error::Response(format!(
                        "failed to convert \"{}\" to bool: {}",
                        conf.truncated_name, truncated
                    ))
                })?
            };

            let mut next_marker = String::new();
            if is_truncated {
                if conf.next_marker_name.is_empty() {
                    return Err(Error::Config("next_marker_name is empty".to_string()));
                }
                match fields.get(&conf.next_marker_name) {
                    None | Some(Value::Null) => {}
                    Some(Value::String(s)) => next_marker = s.clone(),
                    Some(other) => {
                        return Err(Error::Response(format!(
                            "failed to convert \"{}\" to string: {}",
                            conf.next_marker_name, other
                        )))
                    }
                }
            }

            Ok((
                data_list()?,
                NextCondition {
                    next_marker,
                    ..Default::default()
                },
            ))
        }
        PaginationType::Unset => Err(Error::Config(
            "failed to deal with pagination type: not set".to_string(),
        )),
    }
}

fn as_object(result: &Value) -> Result<&serde_json::Map<String, Value>> {
    result
        .as_object()
        .ok_or_else(|| Error::Response("failed to unmarshal as map".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves `total` numbered items according to the paginator config
    struct ScriptedPaginator {
        conf: ConfPaginator,
        total: i64,
        report_total: bool,
        calls: Mutex<Vec<ParamMap>>,
    }

    impl ScriptedPaginator {
        fn new(conf: ConfPaginator, total: i64) -> Self {
            Self {
                conf,
                total,
                report_total: true,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Paginator for ScriptedPaginator {
        async fn get_one_page(&self, params: ParamMap) -> Result<(Vec<Value>, NextCondition)> {
            self.calls.lock().unwrap().push(params.clone());
            let total_count = if self.report_total { self.total } else { -1 };

            let (start, len) = match self.conf.pagination_type {
                PaginationType::OffsetLimit => (
                    params["Offset"].as_i64().unwrap(),
                    params["Limit"].as_i64().unwrap(),
                ),
                PaginationType::PageSize => {
                    let page = params["Page"].as_i64().unwrap();
                    let size = params["Size"].as_i64().unwrap();
                    ((page - 1) * size, size)
                }
                PaginationType::Marker => {
                    let marker = params["Marker"].as_str().unwrap();
                    let start = if marker.is_empty() {
                        0
                    } else {
                        marker.parse().unwrap()
                    };
                    (start, 3)
                }
                _ => (0, self.total),
            };

            let end = (start + len).min(self.total);
            let items: Vec<Value> = (start..end).map(|i| json!(i)).collect();
            let next_marker = if end < self.total {
                end.to_string()
            } else {
                String::new()
            };

            Ok((
                items,
                NextCondition {
                    total_count,
                    next_marker,
                },
            ))
        }
    }

    fn offset_limit() -> ConfPaginator {
        ConfPaginator {
            pagination_type: PaginationType::OffsetLimit,
            offset_name: "Offset".to_string(),
            offset_type: Some(ParamType::Int),
            limit_name: "Limit".to_string(),
            limit_type: Some(ParamType::Int),
            resp_total_name: "TotalCount".to_string(),
            ..Default::default()
        }
    }

    fn page_size_conf() -> ConfPaginator {
        ConfPaginator {
            pagination_type: PaginationType::PageSize,
            offset_name: "Page".to_string(),
            offset_type: Some(ParamType::Int),
            limit_name: "Size".to_string(),
            limit_type: Some(ParamType::Int),
            ..Default::default()
        }
    }

    fn marker_conf() -> ConfPaginator {
        ConfPaginator {
            pagination_type: PaginationType::Marker,
            marker_name: "Marker".to_string(),
            next_marker_name: "NextMarker".to_string(),
            ..Default::default()
        }
    }

    fn expected(n: i64) -> Vec<Value> {
        (0..n).map(|i| json!(i)).collect()
    }

    #[tokio::test]
    async fn test_offset_limit_merges_all_pages() {
        let p = ScriptedPaginator::new(offset_limit(), 25);
        let list = get_entire_list_sized(&p, &p.conf, 10).await.unwrap();
        assert_eq!(list, expected(25));
        assert_eq!(p.calls(), 3);
    }

    #[tokio::test]
    async fn test_offset_limit_stops_on_reported_total() {
        let p = ScriptedPaginator::new(offset_limit(), 20);
        let list = get_entire_list_sized(&p, &p.conf, 10).await.unwrap();
        assert_eq!(list.len(), 20);
        assert_eq!(p.calls(), 2);
    }

    #[tokio::test]
    async fn test_full_last_page_without_total_needs_extra_call() {
        let mut p = ScriptedPaginator::new(offset_limit(), 20);
        p.report_total = false;
        let list = get_entire_list_sized(&p, &p.conf, 10).await.unwrap();
        assert_eq!(list.len(), 20);
        assert_eq!(p.calls(), 3);
    }

    #[tokio::test]
    async fn test_page_size_indexes_from_one() {
        let p = ScriptedPaginator::new(page_size_conf(), 15);
        let list = get_entire_list_sized(&p, &p.conf, 10).await.unwrap();
        assert_eq!(list, expected(15));

        let calls = p.calls.lock().unwrap();
        assert_eq!(calls[0]["Page"], json!(1));
        assert_eq!(calls[1]["Page"], json!(2));
    }

    #[tokio::test]
    async fn test_marker_follows_chain() {
        let p = ScriptedPaginator::new(marker_conf(), 7);
        let list = get_entire_list_sized(&p, &p.conf, 10).await.unwrap();
        assert_eq!(list, expected(7));
        assert_eq!(p.calls(), 3);
        assert_eq!(p.calls.lock().unwrap()[0]["Marker"], json!(""));
    }

    #[tokio::test]
    async fn test_no_pagination_calls_once() {
        let conf = ConfPaginator {
            pagination_type: PaginationType::NoPagination,
            ..Default::default()
        };
        let p = ScriptedPaginator::new(conf, 42);
        let list = get_entire_list_sized(&p, &p.conf, 10).await.unwrap();
        assert_eq!(list.len(), 42);
        assert_eq!(p.calls(), 1);
        assert!(p.calls.lock().unwrap()[0].is_empty());
    }

    #[tokio::test]
    async fn test_unset_pagination_type_is_config_error() {
        let p = ScriptedPaginator::new(ConfPaginator::default(), 1);
        let err = get_entire_list_sized(&p, &p.conf, 10).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(p.calls(), 0);
    }

    struct FailingPaginator(fn() -> Error);

    #[async_trait]
    impl Paginator for FailingPaginator {
        async fn get_one_page(&self, _params: ParamMap) -> Result<(Vec<Value>, NextCondition)> {
            Err((self.0)())
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_bypass() {
        let p = FailingPaginator(|| Error::NotConfigured("no profile".to_string()));
        let list = get_entire_list_sized(&p, &offset_limit(), 10).await.unwrap();
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_page_failure_is_wrapped() {
        let p = FailingPaginator(|| Error::Connector {
            cloud: "azure".to_string(),
            message: "500".to_string(),
        });
        let err = get_entire_list_sized(&p, &offset_limit(), 10).await.unwrap_err();
        assert!(matches!(err, Error::Page { offset: 0, limit: 10, .. }));
        assert!(err.to_string().contains("offset 0/limit 10"));
    }

    #[test]
    fn test_parse_offset_limit_requires_numeric_total() {
        let conf = offset_limit();
        let (list, next) =
            result_data_parse(&json!({"TotalCount": 2, "Items": [1, 2]}), &conf, "$.Items", false)
                .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(next.total_count, 2);

        assert!(result_data_parse(&json!({"Items": []}), &conf, "$.Items", false).is_err());
        assert!(
            result_data_parse(&json!({"TotalCount": "x", "Items": []}), &conf, "$.Items", false)
                .is_err()
        );
    }

    #[test]
    fn test_parse_no_pagination_reports_length() {
        let conf = ConfPaginator {
            pagination_type: PaginationType::NoPagination,
            ..Default::default()
        };
        let (list, next) =
            result_data_parse(&json!({"items": ["a", "b", "c"]}), &conf, "$.items", false).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(next.total_count, 3);
    }

    #[test]
    fn test_parse_marker_without_truncation_field() {
        let conf = marker_conf();
        let (_, next) =
            result_data_parse(&json!({"NextMarker": "", "Items": []}), &conf, "$.Items", false)
                .unwrap();
        assert!(next.next_marker.is_empty());

        let (_, next) =
            result_data_parse(&json!({"NextMarker": "m2", "Items": []}), &conf, "$.Items", false)
                .unwrap();
        assert_eq!(next.next_marker, "m2");
    }

    #[test]
    fn test_parse_marker_with_truncation_field() {
        let conf = ConfPaginator {
            truncated_name: "IsTruncated".to_string(),
            ..marker_conf()
        };

        // configured but absent
        assert!(result_data_parse(&json!({"Items": []}), &conf, "$.Items", false).is_err());

        let (_, next) = result_data_parse(
            &json!({"IsTruncated": false, "NextMarker": "ignored", "Items": []}),
            &conf,
            "$.Items",
            false,
        )
        .unwrap();
        assert!(next.next_marker.is_empty());

        // truncated but next marker missing ends pagination
        let (_, next) =
            result_data_parse(&json!({"IsTruncated": true, "Items": []}), &conf, "$.Items", false)
                .unwrap();
        assert!(next.next_marker.is_empty());

        let no_next_name = ConfPaginator {
            next_marker_name: String::new(),
            ..conf
        };
        assert!(result_data_parse(
            &json!({"IsTruncated": true, "Items": []}),
            &no_next_name,
            "$.Items",
            false
        )
        .is_err());
    }

    #[test]
    fn test_parse_single_object_as_list() {
        let conf = ConfPaginator {
            pagination_type: PaginationType::NoPagination,
            ..Default::default()
        };
        let (list, _) =
            result_data_parse(&json!({"Owner": {"id": 1}}), &conf, "$.Owner", true).unwrap();
        assert_eq!(list, vec![json!({"id": 1})]);
    }

    #[test]
    fn test_set_page_size_falls_back_to_default() {
        set_page_size(-5);
        assert_eq!(page_size(), DEFAULT_PAGE_SIZE);
    }
}
