use thiserror::Error;

/// Root error type for the options runtime.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("symbol error: {0}")]
    Symbol(#[from] SymbolError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("strategy error: {0}")]
    Strategy(#[from] StrategyRuntimeError),

    #[error("position error: {0}")]
    Position(#[from] PositionError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors raised while parsing or formatting symbol strings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    #[error("symbol parse error: '{symbol}': {reason}")]
    ParseError { symbol: String, reason: String },

    #[error("contract not found for symbol: {symbol}")]
    ContractNotFound { symbol: String },
}

/// Errors raised by the gateway adapter and order routing path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway not connected")]
    Disconnected,

    #[error("order rejected: {reason}")]
    OrderRejected { reason: String },

    #[error("order not found: {orderid}")]
    OrderNotFound { orderid: String },

    #[error("invalid order request: {message}")]
    InvalidRequest { message: String },
}

/// Errors raised by the YAML settings/holding persistence layer.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("io error reading/writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors raised by the strategy lifecycle manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyRuntimeError {
    #[error("strategy not found: {name}")]
    NotFound { name: String },

    #[error("strategy class not registered: {class_name}")]
    ClassNotRegistered { class_name: String },

    #[error("strategy already exists: {name}")]
    AlreadyExists { name: String },

    #[error("invalid lifecycle transition: cannot {action} strategy '{name}' in state {state}")]
    InvalidLifecycleTransition {
        name: String,
        action: String,
        state: String,
    },

    #[error("strategy user code error in '{name}': {message}")]
    UserError { name: String, message: String },
}

/// Errors raised while mutating positions/holdings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error("unknown combo type: {name}")]
    UnknownComboType { name: String },

    #[error("missing leg '{leg}' for combo {combo_type}")]
    MissingLeg { combo_type: String, leg: String },

    #[error("holding not found for strategy: {strategy}")]
    HoldingNotFound { strategy: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
