//! Job metadata and option-string parsing.
//!
//! A spooler hands the filter five positional arguments: job id, user,
//! title, copy count, and a whitespace-separated `key=value` option
//! string. Everything the device-control stream needs about the job is
//! derived here.

/// One print job as described by the spooler's arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Spooler-assigned job identifier.
    pub id: String,

    /// Submitting user, forwarded into the job envelope.
    pub user: String,

    /// Job title, forwarded as both job name and file name.
    pub title: String,

    /// Number of copies of each page.
    pub copies: u32,

    /// Raw option string, kept for diagnostics.
    pub options: String,
}

impl Job {
    pub fn new(id: &str, user: &str, title: &str, copies: u32, options: &str) -> Self {
        Self {
            id: id.to_string(),
            user: user.to_string(),
            title: title.to_string(),
            copies,
            options: options.to_string(),
        }
    }

    /// Page setup parsed from this job's option string.
    pub fn page_setup(&self) -> PageSetup {
        PageSetup::from_options(&self.options)
    }
}

/// Per-job page setup derived from the option string.
///
/// Unrecognized options are ignored; missing options fall back to the
/// defaults below. When a key is given more than once the last value
/// wins, matching spooler override order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSetup {
    /// Paper name, uppercased. Default "A4".
    pub paper: String,

    /// Raster resolution in dots per inch. Default 600.
    pub resolution: u32,

    /// Input tray name, passed through verbatim. Default "TRAY1".
    pub tray: String,
}

impl Default for PageSetup {
    fn default() -> Self {
        Self {
            paper: "A4".to_string(),
            resolution: 600,
            tray: "TRAY1".to_string(),
        }
    }
}

impl PageSetup {
    /// Parse a whitespace-separated `key=value` option string.
    ///
    /// Recognized keys are `PageSize`, `Resolution`, and `InputSlot`.
    /// A `Resolution` value may carry a unit suffix (`600dpi`); only the
    /// leading digits are taken.
    pub fn from_options(options: &str) -> Self {
        let mut setup = Self::default();
        for token in options.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key {
                "PageSize" => setup.paper = value.to_uppercase(),
                "Resolution" => {
                    if let Some(dpi) = leading_number(value) {
                        setup.resolution = dpi;
                    }
                }
                "InputSlot" => setup.tray = value.to_string(),
                _ => {}
            }
        }
        setup
    }
}

/// Parse the leading decimal digits of a value, dropping any unit suffix.
fn leading_number(value: &str) -> Option<u32> {
    let digits: &str = {
        let end = value
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(value.len());
        &value[..end]
    };
    digits.parse().ok()
}
