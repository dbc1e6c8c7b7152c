use pronom::DEFAULT_BUFSIZE;

/// Default record templates: one CSV line per record.
pub const DEFAULT_MATCH_TEMPLATE: &str = "OK,{elapsed},{puid},{format},{size},{path}\n";
pub const DEFAULT_NOMATCH_TEMPLATE: &str = "KO,{elapsed},,{size},{path}\n";

/// Runtime configuration for a batch run.
///
/// An explicit value handed to the driver; there is no process-wide
/// state.
#[derive(Debug, Clone)]
pub struct Config {
    /// size of the head and tail buffers matched against.
    pub bufsize: usize,
    /// descend into subdirectories.
    pub recurse: bool,
    /// identify the contents of zip containers.
    pub zip: bool,
    /// record per-format and per-signature match cost.
    pub diagnose: bool,
    /// template for match records, `{field}` placeholders.
    pub match_template: String,
    /// template for no-match records.
    pub nomatch_template: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            bufsize: DEFAULT_BUFSIZE,
            recurse: false,
            zip: false,
            diagnose: false,
            match_template: DEFAULT_MATCH_TEMPLATE.to_string(),
            nomatch_template: DEFAULT_NOMATCH_TEMPLATE.to_string(),
        }
    }
}
