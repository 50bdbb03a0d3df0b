// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Rule phases: the fixed points in a transaction's life at which rules run.

use serde::{Deserialize, Serialize};

use crate::state::State;

/// Execution phase of a rule.
///
/// Non-stream phases run once, over buffered data, when their dispatching
/// state fires. Stream phases run incrementally: header stream phases see
/// the header state, body stream phases run once per delivered body chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Buffered request headers.
    RequestHeader,
    /// Buffered request body.
    RequestBody,
    /// Buffered response headers.
    ResponseHeader,
    /// Buffered response body.
    ResponseBody,
    /// After the response has finished, before logging.
    PostProcess,
    /// Streaming view of the request headers.
    StreamRequestHeader,
    /// Streaming request body chunks.
    StreamRequestBody,
    /// Streaming view of the response headers.
    StreamResponseHeader,
    /// Streaming response body chunks.
    StreamResponseBody,
}

impl Phase {
    /// All phases, in dispatch order.
    pub const ALL: [Self; 9] = [
        Self::RequestHeader,
        Self::RequestBody,
        Self::ResponseHeader,
        Self::ResponseBody,
        Self::PostProcess,
        Self::StreamRequestHeader,
        Self::StreamRequestBody,
        Self::StreamResponseHeader,
        Self::StreamResponseBody,
    ];

    /// Number of phases.
    pub const COUNT: usize = Self::ALL.len();

    /// Dense index for per-phase tables.
    pub const fn index(self) -> usize {
        match self {
            Self::RequestHeader => 0,
            Self::RequestBody => 1,
            Self::ResponseHeader => 2,
            Self::ResponseBody => 3,
            Self::PostProcess => 4,
            Self::StreamRequestHeader => 5,
            Self::StreamRequestBody => 6,
            Self::StreamResponseHeader => 7,
            Self::StreamResponseBody => 8,
        }
    }

    /// True for the streaming phases.
    pub const fn is_stream(self) -> bool {
        matches!(
            self,
            Self::StreamRequestHeader
                | Self::StreamRequestBody
                | Self::StreamResponseHeader
                | Self::StreamResponseBody
        )
    }

    /// Whether rules in this phase may chain.
    pub const fn allows_chain(self) -> bool {
        !self.is_stream()
    }

    /// Whether targets in this phase may carry transformations.
    pub const fn allows_tfns(self) -> bool {
        !self.is_stream()
    }

    /// The state-machine state whose hooks dispatch this phase.
    pub const fn dispatch_state(self) -> State {
        match self {
            Self::StreamRequestHeader | Self::RequestHeader => State::RequestHeader,
            Self::StreamRequestBody => State::RequestBody,
            Self::RequestBody => State::RequestFinished,
            Self::StreamResponseHeader | Self::ResponseHeader => State::ResponseHeader,
            Self::StreamResponseBody => State::ResponseBody,
            Self::ResponseBody => State::ResponseFinished,
            Self::PostProcess => State::PostProcess,
        }
    }

    /// Stable lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::RequestHeader => "request_header",
            Self::RequestBody => "request_body",
            Self::ResponseHeader => "response_header",
            Self::ResponseBody => "response_body",
            Self::PostProcess => "post_process",
            Self::StreamRequestHeader => "stream_request_header",
            Self::StreamRequestBody => "stream_request_body",
            Self::StreamResponseHeader => "stream_response_header",
            Self::StreamResponseBody => "stream_response_body",
        }
    }
}

impl core::fmt::Display for Phase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_dense_and_unique() {
        let mut seen = [false; Phase::COUNT];
        for phase in Phase::ALL {
            assert!(!seen[phase.index()]);
            seen[phase.index()] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn stream_phases_disallow_chain_and_tfns() {
        for phase in Phase::ALL {
            assert_eq!(phase.allows_chain(), !phase.is_stream());
            assert_eq!(phase.allows_tfns(), !phase.is_stream());
        }
    }

    #[test]
    fn serde_names_round_trip() {
        let json = serde_json::to_string(&Phase::StreamRequestBody).unwrap();
        assert_eq!(json, "\"stream_request_body\"");
        let back: Phase = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Phase::StreamRequestBody);
    }
}
