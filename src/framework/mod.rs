//! Benchmark framework
//!
//! Turns definitions into findings. Nothing in here knows about a specific
//! cloud: all network access goes through the connectors looked up in a
//! [`ConnectorRegistry`](crate::connector::ConnectorRegistry).
//!
//! # Architecture
//!
//! - [`pagination`] - Drives a page source to completion under one of four
//!   protocols and parses page responses
//! - [`listor`] - Enumerates one kind of resource through its connector
//! - [`checker`] - Extracts identified properties and judges them with a
//!   JSON schema
//! - [`baseline`] - Ordered checkers of one recommendation, concurrent
//!   extraction and integrity hashing
//! - [`dataprovider`] - Where checkers get their raw documents from
//! - [`constraint`] - Version requirements of listing targets
//! - [`hash`] - Canonical digests of definitions
//! - [`params`] - Typed request parameters
//!
//! # Flow
//!
//! ```text
//! Listor::list_data -> get_entire_list -> result_data_parse (per page)
//!     -> DataProvider -> Checker::get_prop -> Checker::validate
//!     -> Baseline aggregates per checker
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cloudbench::framework::{Baseline, GetPropOptions, MapDataProvider};
//!
//! async fn judge(baseline: &Baseline, data: Arc<MapDataProvider>) -> cloudbench::Result<()> {
//!     let props = baseline.get_prop(&GetPropOptions::new().with_data(data)).await;
//!     for finding in baseline.validate(&props)? {
//!         println!("{} {}", finding.id, finding.in_risk);
//!     }
//!     Ok(())
//! }
//! ```

pub mod baseline;
pub mod checker;
pub mod constraint;
pub mod dataprovider;
pub mod hash;
pub mod listor;
pub mod pagination;
pub mod params;

pub use baseline::Baseline;
pub use checker::{Checker, CheckerProp, GetPropOptions, ValidateResult};
pub use constraint::ConstraintChecker;
pub use dataprovider::{DataProvider, ItemHash, ListorData, ListorDataProvider, MapDataProvider};
pub use hash::{calc_hash, to_hex, HashType};
pub use listor::{ListOptions, Listor};
pub use pagination::{
    get_entire_list, get_entire_list_sized, page_size, result_data_parse, set_page_size,
    NextCondition, Paginator, DEFAULT_PAGE_SIZE,
};
pub use params::{add_param_int, add_param_string, ParamMap};
