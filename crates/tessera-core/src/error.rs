use thiserror::Error;

#[derive(Debug, Error)]
pub enum TesseraError {
    // ── Shape / format ───────────────────────────────────────────────────────
    #[error("malformed: {0}")]
    Malformed(String),

    #[error("malformed field: {0}")]
    MalformedField(&'static str),

    #[error("unknown version: {0}")]
    UnknownVersion(u32),

    #[error("truncated input: needed {needed} more bytes")]
    TruncatedInput { needed: usize },

    #[error("unknown message type: {0}")]
    UnknownMessage(String),

    // ── Transaction validation ───────────────────────────────────────────────
    #[error("invalid signature")]
    InvalidSignature,

    #[error("unknown utxo: {0}")]
    UnknownUtxo(String),

    #[error("double spend of anchor {0}")]
    DoubleSpend(String),

    #[error("insufficient funds: need {need} micros, have {have}")]
    InsufficientFunds { need: u64, have: u64 },

    #[error("rule violation: {0}")]
    RuleViolation(String),

    // ── Block / chain ────────────────────────────────────────────────────────
    #[error("hash does not meet difficulty {difficulty}")]
    BadDifficulty { difficulty: u32 },

    #[error("stale candidate: head moved past {expected_prev}")]
    StaleCandidate { expected_prev: String },

    #[error("reorg rejected: {0}")]
    ReorgRejected(String),

    #[error("inconsistent digest at block {height}: {reason}")]
    InconsistentDigest { height: u64, reason: String },

    // ── Wallet ───────────────────────────────────────────────────────────────
    #[error("address derivation exhausted after {attempts} attempts")]
    DerivationExhausted { attempts: u64 },

    /// Expected derivation miss; callers retry with the next modifier and
    /// never log this.
    #[error("address does not meet the security level of its type")]
    AddressBelowSecurityLevel,

    // ── Node / network ───────────────────────────────────────────────────────
    #[error("mempool full")]
    MempoolFull,

    #[error("request timed out after {ms} ms")]
    Timeout { ms: u64 },

    #[error("io error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for TesseraError {
    fn from(e: std::io::Error) -> Self {
        TesseraError::IoError(e.to_string())
    }
}
