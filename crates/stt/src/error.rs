/// Vendor error codes with special handling.
pub mod codes {
    /// The server answered with garbage; stop writing to this session at once.
    pub const BAD_SERVER_RESPONSE: i32 = 10008;
    pub const TIME_OUT: i32 = 10114;
    /// Network-family codes.
    pub const NET_FIRST: i32 = 10200;
    pub const NET_LAST: i32 = 10299;

    pub fn is_network(code: i32) -> bool {
        (NET_FIRST..=NET_LAST).contains(&code)
    }

    pub fn is_timeout(code: i32) -> bool {
        code == TIME_OUT
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("session open failed (code {code}): {detail}")]
    SessionOpen { code: i32, detail: String },
    #[error("audio write failed (code {code}): {detail}")]
    Write { code: i32, detail: String },
    #[error("engine error (code {code}): {detail}")]
    Engine { code: i32, detail: String },
    #[error("empty text")]
    EmptyText,
    #[error("synthesis produced no audio")]
    NoAudio,
    #[error("synthesis timed out after {0} ms")]
    Timeout(u64),
}

impl SttError {
    /// Vendor code, if the error came from the engine.
    pub fn code(&self) -> Option<i32> {
        match self {
            SttError::SessionOpen { code, .. }
            | SttError::Write { code, .. }
            | SttError::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_bad_server_response(&self) -> bool {
        self.code() == Some(codes::BAD_SERVER_RESPONSE)
    }
}
