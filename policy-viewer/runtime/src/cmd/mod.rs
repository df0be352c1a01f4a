use anyhow::{bail, Context, Result};
use npv_core::{identity::Endpoint, CidrSet};
use tracing::warn;

pub mod agent;
pub mod id;
pub mod inspect;
pub mod list;
pub mod manifest;
pub mod reach;
pub mod summary;
pub mod traffic;

/// Reads one of the mutually exclusive `--{prefix}-cidrs`, `--{prefix}-private-cidrs` and
/// `--{prefix}-public-cidrs` options.
pub(crate) fn cidr_set(
    prefix: &str,
    cidrs: Option<&str>,
    private: bool,
    public: bool,
) -> Result<Option<CidrSet>> {
    let count = usize::from(cidrs.is_some()) + usize::from(private) + usize::from(public);
    if count > 1 {
        bail!(
            "one of --{prefix}-cidrs, --{prefix}-private-cidrs, --{prefix}-public-cidrs can be specified"
        );
    }
    if private {
        return Ok(Some(CidrSet::private()));
    }
    if public {
        return Ok(Some(CidrSet::public()));
    }
    cidrs
        .map(|s| {
            s.parse::<CidrSet>()
                .with_context(|| format!("failed to parse --{prefix}-cidrs"))
        })
        .transpose()
}

/// A pair of flags selecting one or both of two classes. Neither flag means both.
pub(crate) fn either(a: bool, b: bool) -> (bool, bool) {
    if a || b {
        (a, b)
    } else {
        (true, true)
    }
}

/// Subjects skipped by a best-effort command.
#[derive(Debug, Default)]
pub(crate) struct Failures(Vec<(Endpoint, anyhow::Error)>);

impl Failures {
    pub fn record(&mut self, pod: Endpoint, error: anyhow::Error) {
        warn!(%pod, error = %format_args!("{error:#}"), "Skipping pod");
        self.0.push((pod, error));
    }

    /// Lists the skipped subjects on stderr, after the results.
    pub fn report(self) {
        if self.0.is_empty() {
            return;
        }
        eprintln!("failed to process {} pod(s):", self.0.len());
        for (pod, error) in self.0 {
            eprintln!("  {pod}: {error:#}");
        }
    }
}
