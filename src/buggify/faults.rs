//! Named fault injection sites and their default probabilities.

pub mod write_stream {
    /// Stream creation fails with a transient UNAVAILABLE status
    pub const CREATE_UNAVAILABLE: &str = "write_stream.create_unavailable";
    /// Stream creation fails with a permanent INVALID_ARGUMENT status
    pub const CREATE_INVALID_ARGUMENT: &str = "write_stream.create_invalid_argument";
    /// Append response carries a server error
    pub const APPEND_SERVER_ERROR: &str = "write_stream.append_server_error";
    /// Append is stored but acknowledged at the wrong offset
    pub const APPEND_OFFSET_SKEW: &str = "write_stream.append_offset_skew";
    /// Append response never arrives (transport fault)
    pub const APPEND_RESPONSE_DROPPED: &str = "write_stream.append_response_dropped";
    /// Finalize fails with a transient UNAVAILABLE status
    pub const FINALIZE_UNAVAILABLE: &str = "write_stream.finalize_unavailable";
    /// Finalize fails with a transient DEADLINE_EXCEEDED status
    pub const FINALIZE_DEADLINE_EXCEEDED: &str = "write_stream.finalize_deadline_exceeded";
}

/// All faults with their default probabilities
pub const ALL_FAULTS: &[(&str, f64)] = &[
    (write_stream::CREATE_UNAVAILABLE, 0.05),
    (write_stream::CREATE_INVALID_ARGUMENT, 0.005),
    (write_stream::APPEND_SERVER_ERROR, 0.01),
    (write_stream::APPEND_OFFSET_SKEW, 0.005),
    (write_stream::APPEND_RESPONSE_DROPPED, 0.005),
    (write_stream::FINALIZE_UNAVAILABLE, 0.05),
    (write_stream::FINALIZE_DEADLINE_EXCEEDED, 0.02),
];
