//! JSON extraction boundary.
//!
//! Engines hand back JSON text. Before it leaves the session we
//!
//! 1. drop the known "no content" payloads, and
//! 2. optionally re-render numbers through a fixed formatting policy, so the
//!    payload never depends on how a particular engine formats decimals.
//!
//! Rendering goes through `serde_json` with a custom `Formatter`; no process
//! or thread locale state is touched.

use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;
use tracing::debug;

/// Empty partial hypothesis, as the engine prints it.
pub const EMPTY_PARTIAL_RESULT: &str = "{\n  \"partial\" : \"\"\n}";
/// Empty text result, canonical pretty form.
pub const EMPTY_TEXT_RESULT: &str = "{\n  \"text\" : \"\"\n}";
/// Empty text result, compact form.
pub const EMPTY_TEXT_RESULT_ALT: &str = "{\"text\": \"\"}";

/// Which extraction call produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    Final,
    Result,
    Partial,
}

/// Whether `json` is one of the engine's "no content" payloads for `kind`.
///
/// Partial extraction can return text-shaped payloads too, so the compact
/// empty text form counts as empty there as well.
pub fn is_empty_payload(kind: Extraction, json: &str) -> bool {
    match kind {
        Extraction::Final | Extraction::Result => {
            json == EMPTY_TEXT_RESULT || json == EMPTY_TEXT_RESULT_ALT
        }
        Extraction::Partial => json == EMPTY_PARTIAL_RESULT || json == EMPTY_TEXT_RESULT_ALT,
    }
}

/// How numbers in result payloads are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumberFormat {
    /// Pass the engine's text through untouched.
    #[default]
    Verbatim,
    /// Re-serialise with `.` as decimal separator and a fixed number of
    /// fractional digits. Output is compact JSON with the engine's key order.
    FixedDecimals(u8),
}

impl NumberFormat {
    /// Produce an owned payload from a borrowed engine snapshot.
    ///
    /// Payloads that do not parse as JSON are passed through verbatim.
    pub fn render(self, raw: &str) -> String {
        let NumberFormat::FixedDecimals(decimals) = self else {
            return raw.to_owned();
        };

        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "result payload is not valid JSON, passing through");
                return raw.to_owned();
            }
        };

        let mut out = Vec::with_capacity(raw.len());
        let mut ser = serde_json::Serializer::with_formatter(
            &mut out,
            FixedDecimalFormatter {
                decimals: usize::from(decimals),
            },
        );
        if let Err(e) = value.serialize(&mut ser) {
            debug!(error = %e, "failed to re-render result payload, passing through");
            return raw.to_owned();
        }
        String::from_utf8(out).unwrap_or_else(|_| raw.to_owned())
    }
}

struct FixedDecimalFormatter {
    decimals: usize,
}

impl Formatter for FixedDecimalFormatter {
    fn write_f32<W>(&mut self, writer: &mut W, value: f32) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        write!(writer, "{:.*}", self.decimals, value)
    }

    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        write!(writer, "{:.*}", self.decimals, value)
    }
}
