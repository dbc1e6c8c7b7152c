// sleuth: identify the file formats of digital objects.
//
// the matching engine lives in the `pronom` crate; this crate carries
// what a usable tool needs around it: the registry loader, the batch
// driver, record templating, and the command line binary.

pub mod config;
pub mod driver;
pub mod output;
pub mod registry;

pub use crate::config::Config;
pub use crate::driver::{CancelToken, Driver, DriverError, Progress, Summary};
pub use crate::output::{Record, RecordSink, Template, TemplateSink};
