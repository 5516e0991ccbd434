//! The probe pass: walks the registry over one device and settles on a
//! result.
//!
//! A pass is strictly sequential. Registration order decides which of
//! several plausible formats wins, so candidates are tried one by one and
//! the first accepted one ends the pass. Several devices may be probed at
//! once with [`Prober::probe_paths`]; each pass gets its own context.

use crate::context::ProbeContext;
use crate::io::{MemoryReader, Reader};
use crate::matcher::match_descriptor;
use crate::options::ProbeOptions;
use crate::signature::{registry, Descriptor};
use crate::types::{ProbeRecord, Usage, Verdict};
use crate::{BlockSource, ProbeError, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Devices up to this size (a 1.44 MB floppy) are too small to carry RAID
/// metadata, and a safe pass on them settles for the first match.
pub const TINY_DEVICE_SIZE: u64 = 1440 * 1024;

/// Runs probe passes with a fixed set of options.
#[derive(Debug, Clone)]
pub struct Prober {
    options: ProbeOptions,
    descriptors: Vec<&'static Descriptor>,
}

impl Default for Prober {
    fn default() -> Self {
        Self {
            options: ProbeOptions::default(),
            descriptors: registry().iter().collect(),
        }
    }
}

/// Accepted records and the first I/O failure seen on the way.
#[derive(Default)]
struct PassOutcome {
    accepted: Vec<ProbeRecord>,
    first_error: Option<ProbeError>,
}

impl PassOutcome {
    fn note_error(&mut self, name: &str, err: ProbeError) {
        tracing::warn!(name, error = %err, "probe failed with I/O error, continuing");
        self.first_error.get_or_insert(err);
    }
}

impl Prober {
    /// Builds a prober; type filters naming unknown formats are rejected.
    pub fn new(options: ProbeOptions) -> Result<Self> {
        options.validate()?;
        let descriptors = registry().iter().filter(|d| options.allows(d)).collect();
        Ok(Self {
            options,
            descriptors,
        })
    }

    pub fn options(&self) -> &ProbeOptions {
        &self.options
    }

    /// Descriptors this prober tries, in order.
    pub fn descriptors(&self) -> &[&'static Descriptor] {
        &self.descriptors
    }

    fn context<'a>(&self, source: &'a mut dyn BlockSource) -> ProbeContext<'a> {
        ProbeContext::new(source).with_checksums(self.options.verify_checksums)
    }

    fn below_minimum(&self, ctx: &ProbeContext<'_>) -> bool {
        let small = ctx.size().is_some_and(|s| s <= self.options.min_device_size);
        if small {
            tracing::debug!(size = ?ctx.size(), "device too small to probe");
        }
        small
    }

    /// Matches and probes one descriptor. Missing bytes count as a
    /// mismatch; only device errors come back as `Err`.
    fn try_descriptor(
        &self,
        ctx: &mut ProbeContext<'_>,
        descriptor: &'static Descriptor,
    ) -> Result<Option<ProbeRecord>> {
        if descriptor.usage == Usage::Raid && is_tiny(ctx) {
            tracing::trace!(name = descriptor.name, "no RAID metadata on a tiny device");
            return Ok(None);
        }
        match run_descriptor(ctx, descriptor) {
            Ok(Some(record)) => {
                tracing::debug!(name = descriptor.name, "candidate accepted");
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) if e.is_soft() => {
                tracing::debug!(name = descriptor.name, error = %e, "candidate rejected");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// One probe pass: the first accepted candidate in registration order
    /// is the result.
    pub fn probe(&self, source: &mut dyn BlockSource) -> Result<Verdict> {
        let mut ctx = self.context(source);
        if self.below_minimum(&ctx) {
            return Ok(Verdict::NotRecognized);
        }
        let mut pass = PassOutcome::default();
        for &d in &self.descriptors {
            match self.try_descriptor(&mut ctx, d) {
                Ok(Some(record)) => return Ok(Verdict::Recognized(record)),
                Ok(None) => {}
                Err(e) => pass.note_error(d.name, e),
            }
        }
        match pass.first_error {
            Some(err) => Err(err),
            None => Ok(Verdict::NotRecognized),
        }
    }

    /// Every accepted candidate, in registration order. Meant for
    /// diagnostics; [`probe`](Self::probe) is what decides a device.
    pub fn probe_all(&self, source: &mut dyn BlockSource) -> Result<Vec<ProbeRecord>> {
        let mut ctx = self.context(source);
        if self.below_minimum(&ctx) {
            return Ok(Vec::new());
        }
        let mut pass = PassOutcome::default();
        for &d in &self.descriptors {
            match self.try_descriptor(&mut ctx, d) {
                Ok(Some(record)) => pass.accepted.push(record),
                Ok(None) => {}
                Err(e) => pass.note_error(d.name, e),
            }
        }
        match pass.first_error {
            Some(err) if pass.accepted.is_empty() => Err(err),
            _ => Ok(pass.accepted),
        }
    }

    /// Like [`probe`](Self::probe), but keeps going after the first match
    /// and fails with [`ProbeError::Ambivalent`] when several formats match
    /// and at least one of them does not tolerate company. A RAID or crypto
    /// match ends the scan. On a tiny device the first match is the result.
    pub fn probe_safe(&self, source: &mut dyn BlockSource) -> Result<Verdict> {
        let mut ctx = self.context(source);
        if self.below_minimum(&ctx) {
            return Ok(Verdict::NotRecognized);
        }
        let tiny = is_tiny(&ctx);
        let mut pass = PassOutcome::default();
        let mut intolerant = 0usize;
        for &d in &self.descriptors {
            match self.try_descriptor(&mut ctx, d) {
                Ok(Some(record)) => {
                    if tiny {
                        return Ok(Verdict::Recognized(record));
                    }
                    pass.accepted.push(record);
                    if matches!(d.usage, Usage::Raid | Usage::Crypto) {
                        break;
                    }
                    if !d.tolerant {
                        intolerant += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => pass.note_error(d.name, e),
            }
        }

        if pass.accepted.len() > 1 && intolerant > 0 {
            let names = pass.accepted.iter().map(|r| r.name).collect();
            return Err(ProbeError::Ambivalent(names));
        }
        match (pass.accepted.into_iter().next(), pass.first_error) {
            (Some(record), _) => Ok(Verdict::Recognized(record)),
            (None, Some(err)) => Err(err),
            (None, None) => Ok(Verdict::NotRecognized),
        }
    }

    /// Opens `path` and probes it.
    pub fn probe_path(&self, path: impl AsRef<Path>) -> Result<Verdict> {
        let mut reader = Reader::new(path)?;
        self.probe(&mut reader)
    }

    /// Probes several devices in parallel. Results come back in the order
    /// of `paths`.
    pub fn probe_paths<P>(&self, paths: &[P]) -> Vec<(PathBuf, Result<Verdict>)>
    where
        P: AsRef<Path> + Sync,
    {
        paths
            .par_iter()
            .map(|p| {
                let path = p.as_ref();
                (path.to_path_buf(), self.probe_path(path))
            })
            .collect()
    }
}

fn is_tiny(ctx: &ProbeContext<'_>) -> bool {
    ctx.size().is_some_and(|s| s <= TINY_DEVICE_SIZE)
}

fn run_descriptor(
    ctx: &mut ProbeContext<'_>,
    descriptor: &'static Descriptor,
) -> Result<Option<ProbeRecord>> {
    let Some(hit) = match_descriptor(ctx, descriptor)? else {
        return Ok(None);
    };
    let findings = descriptor.format.probe(ctx, &hit)?;
    Ok(findings.map(|f| f.into_record(&hit, ctx.sector_size())))
}

/// Probes an in-memory image with default options.
pub fn probe_bytes(data: &[u8]) -> Result<Verdict> {
    Prober::default().probe(&mut MemoryReader::new(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiny_device_not_probed() {
        let verdict = probe_bytes(&[0u8; 1024]).unwrap();
        assert_eq!(verdict, Verdict::NotRecognized);
    }

    #[test]
    fn test_filters_shrink_descriptor_list() {
        let prober = Prober::new(
            ProbeOptions::new().with_usage(crate::options::UsageFilter::Only(vec![Usage::Crypto])),
        )
        .unwrap();
        let names: Vec<_> = prober.descriptors().iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["DM_verity_hash", "DM_integrity", "BitLocker"]);
    }

    #[test]
    fn test_zeroed_image_not_recognized() {
        let verdict = probe_bytes(&vec![0u8; 64 * 1024]).unwrap();
        assert!(!verdict.is_recognized());
    }
}
