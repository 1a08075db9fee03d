//! W3C trace-context identity and propagation header handling.

use http::header::{HeaderMap, HeaderName, HeaderValue};

use super::{SpanId, TraceId};

/// Propagation header carrying the serialized [`TraceContext`].
pub const TRACEPARENT_HEADER: &str = "traceparent";

const SUPPORTED_VERSION: u8 = 0;
const MAX_VERSION: u8 = 254;

/// The fields of a successfully parsed `traceparent` header.
///
/// `parent_id` is the span id carried by the header: the effective parent of
/// the whole request when the header came from an upstream caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ParsedTraceParent {
    pub(crate) trace_id: TraceId,
    pub(crate) parent_id: SpanId,
    pub(crate) sampled: bool,
}

/// Identifies one span within one trace.
///
/// Immutable once constructed. A child context shares its parent's `trace_id`
/// and `sampled` flag and records the parent's `span_id` as `parent_id`; a
/// fresh root context generates a new `trace_id` and has no parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    parent_id: Option<SpanId>,
    sampled: bool,
}

impl TraceContext {
    /// Create a fresh root context with a newly generated trace id.
    pub fn root() -> Self {
        TraceContext {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_id: None,
            sampled: true,
        }
    }

    /// Create a context from an inbound header map.
    ///
    /// A valid `traceparent` joins the caller's trace: its trace id and
    /// sampled flag are inherited and its span id becomes this context's
    /// parent. A missing or malformed header falls back to [`root`], never an
    /// error.
    ///
    /// [`root`]: TraceContext::root
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(TRACEPARENT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(Self::parse)
            .map(|parsed| TraceContext {
                trace_id: parsed.trace_id,
                span_id: SpanId::random(),
                parent_id: Some(parsed.parent_id),
                sampled: parsed.sampled,
            })
            .unwrap_or_else(Self::root)
    }

    /// Derive a child context: same trace, this span as parent, fresh span id.
    pub fn child(&self) -> Self {
        TraceContext {
            trace_id: self.trace_id,
            span_id: SpanId::random(),
            parent_id: Some(self.span_id),
            sampled: self.sampled,
        }
    }

    /// The trace id shared by every span of this request chain.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// This span's own id.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// The span that caused this one to exist, absent for a root span.
    pub fn parent_id(&self) -> Option<SpanId> {
        self.parent_id
    }

    /// Whether the trace was marked as sampled. Inherited unchanged by every
    /// descendant; export never depends on it.
    pub fn sampled(&self) -> bool {
        self.sampled
    }

    /// Serialize to the `traceparent` header value
    /// (`00-{trace_id}-{span_id}-{flags}`).
    pub fn traceparent(&self) -> String {
        format!(
            "{:02x}-{}-{}-{:02x}",
            SUPPORTED_VERSION,
            self.trace_id,
            self.span_id,
            u8::from(self.sampled)
        )
    }

    /// Set the `traceparent` header on an outgoing request's header map.
    /// Does nothing if the value is not a valid header value.
    pub fn inject(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&self.traceparent()) {
            headers.insert(HeaderName::from_static(TRACEPARENT_HEADER), value);
        }
    }

    /// Parse a `traceparent` header value.
    ///
    /// Surrounding whitespace is trimmed first. Accepts only
    /// `vv-{32 lowercase hex}-{16 lowercase hex}-{2 lowercase hex}`; for
    /// version `00` exactly four fields and flags `00`..`02` are required.
    /// Any mismatch yields `None`, never an error.
    pub(crate) fn parse(header: &str) -> Option<ParsedTraceParent> {
        let parts = header.trim().split('-').collect::<Vec<&str>>();
        if parts.len() < 4 {
            return None;
        }

        if parts[0].len() != 2 || has_uppercase(parts[0]) {
            return None;
        }
        let version = u8::from_str_radix(parts[0], 16).ok()?;
        if version > MAX_VERSION || (version == 0 && parts.len() != 4) {
            return None;
        }

        let trace_id = TraceId::from_hex(parts[1]).ok()?;
        let parent_id = SpanId::from_hex(parts[2]).ok()?;

        if parts[3].len() != 2 || has_uppercase(parts[3]) {
            return None;
        }
        let flags = u8::from_str_radix(parts[3], 16).ok()?;
        if version == 0 && flags > 2 {
            return None;
        }

        Some(ParsedTraceParent {
            trace_id,
            parent_id,
            sampled: flags & 1 == 1,
        })
    }
}

fn has_uppercase(field: &str) -> bool {
    field.chars().any(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[rustfmt::skip]
    fn parse_data() -> Vec<(&'static str, ParsedTraceParent)> {
        vec![
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00", ParsedTraceParent { trace_id: TraceId::from(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736), parent_id: SpanId::from(0x00f0_67aa_0ba9_02b7), sampled: false }),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01", ParsedTraceParent { trace_id: TraceId::from(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736), parent_id: SpanId::from(0x00f0_67aa_0ba9_02b7), sampled: true }),
            ("  00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01  ", ParsedTraceParent { trace_id: TraceId::from(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736), parent_id: SpanId::from(0x00f0_67aa_0ba9_02b7), sampled: true }),
            ("02-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-09-f09", ParsedTraceParent { trace_id: TraceId::from(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736), parent_id: SpanId::from(0x00f0_67aa_0ba9_02b7), sampled: true }),
            ("02-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-08", ParsedTraceParent { trace_id: TraceId::from(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736), parent_id: SpanId::from(0x00f0_67aa_0ba9_02b7), sampled: false }),
        ]
    }

    #[rustfmt::skip]
    fn parse_data_invalid() -> Vec<(&'static str, &'static str)> {
        vec![
            ("", "completely empty"),
            ("   ", "whitespace only"),
            ("00", "too few parts"),
            ("00-", "incomplete with separator"),
            ("0000-00000000000000000000000000000000-0000000000000000-01", "wrong version length"),
            ("00-ab00000000000000000000000000000000-cd00000000000000-01", "wrong trace id length"),
            ("00-ab000000000000000000000000000000-cd0000000000000000-01", "wrong span id length"),
            ("00-ab000000000000000000000000000000-cd00000000000000-0100", "wrong flags length"),
            ("qw-00000000000000000000000000000000-0000000000000000-01", "bogus version"),
            ("00-qw000000000000000000000000000000-cd00000000000000-01", "bogus trace id"),
            ("00-ab000000000000000000000000000000-qw00000000000000-01", "bogus span id"),
            ("00-ab000000000000000000000000000000-cd00000000000000-qw", "bogus flags"),
            ("A0-00000000000000000000000000000000-0000000000000000-01", "upper case version"),
            ("00-AB000000000000000000000000000000-cd00000000000000-01", "upper case trace id"),
            ("00-ab000000000000000000000000000000-CD00000000000000-01", "upper case span id"),
            ("00-ab000000000000000000000000000000-cd00000000000000-A1", "upper case flags"),
            ("00-ab000000000000000000000000000000-cd00000000000000-09", "version 0 unused flag bits"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7", "missing flags"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-", "empty flags"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-", "version 0 extra field"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736--01", "empty span id field"),
            ("ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01", "reserved version"),
            ("00--4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01", "double separator"),
            ("00-4bf92f3577b34da6a3ce929d0e0e473ü-00f067aa0ba902b7-01", "unicode in trace id"),
        ]
    }

    #[test]
    fn parse_valid_headers() {
        for (header, expected) in parse_data() {
            assert_eq!(TraceContext::parse(header), Some(expected), "{header}");
        }
    }

    #[test]
    fn parse_rejects_invalid_headers() {
        for (header, reason) in parse_data_invalid() {
            assert_eq!(TraceContext::parse(header), None, "{reason}");
        }
    }

    #[test]
    fn parse_rejects_very_long_input() {
        let header = format!("00-{}-00f067aa0ba902b7-01", "a".repeat(1000));
        assert_eq!(TraceContext::parse(&header), None);
    }

    #[test]
    fn serialize_reproduces_parsed_fields() {
        for (header, _) in parse_data() {
            let mut headers = HeaderMap::new();
            headers.insert(TRACEPARENT_HEADER, header.trim().parse().unwrap());
            let context = TraceContext::from_headers(&headers);
            let parsed = TraceContext::parse(header).unwrap();

            // Round trip up to the span id, which is always freshly generated.
            let reparsed = TraceContext::parse(&context.traceparent()).unwrap();
            assert_eq!(reparsed.trace_id, parsed.trace_id);
            assert_eq!(reparsed.sampled, parsed.sampled);
            assert_eq!(reparsed.parent_id, context.span_id());
        }
    }

    #[test]
    fn from_headers_without_header_is_fresh_root() {
        let context = TraceContext::from_headers(&HeaderMap::new());
        assert_eq!(context.parent_id(), None);
        assert!(context.sampled());
    }

    #[test]
    fn from_headers_with_example_header() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACEPARENT_HEADER, EXAMPLE.parse().unwrap());
        let context = TraceContext::from_headers(&headers);
        assert_eq!(
            context.trace_id(),
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
        );
        assert_eq!(
            context.parent_id(),
            Some(SpanId::from_hex("00f067aa0ba902b7").unwrap())
        );
        assert!(context.sampled());
    }

    #[test]
    fn from_headers_with_malformed_header_is_fresh_root() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACEPARENT_HEADER, "not-a-traceparent".parse().unwrap());
        let context = TraceContext::from_headers(&headers);
        assert_eq!(context.parent_id(), None);
    }

    #[test]
    fn child_shares_trace_and_links_parent() {
        let root = TraceContext::root();
        let child = root.child();
        assert_eq!(child.trace_id(), root.trace_id());
        assert_eq!(child.parent_id(), Some(root.span_id()));
        assert_eq!(child.sampled(), root.sampled());
        assert_ne!(child.span_id(), root.span_id());
    }

    #[test]
    fn unsampled_serializes_zero_flags() {
        let mut headers = HeaderMap::new();
        headers.insert(
            TRACEPARENT_HEADER,
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00"
                .parse()
                .unwrap(),
        );
        let context = TraceContext::from_headers(&headers);
        assert!(context.traceparent().ends_with("-00"));
    }

    #[test]
    fn inject_sets_header() {
        let context = TraceContext::root();
        let mut headers = HeaderMap::new();
        context.inject(&mut headers);
        assert_eq!(
            headers.get(TRACEPARENT_HEADER).unwrap().to_str().unwrap(),
            context.traceparent()
        );
    }
}
