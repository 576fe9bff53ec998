use std::fmt;

macro_rules! err {
    ($kind:ident, $msg:literal) => {
        $crate::dex::error::DexError::of($crate::dex::error::ErrorKind::$kind, $msg)
    };
    ($kind:ident, $fmtstr:literal, $($args:tt)*) => {
        $crate::dex::error::DexError::of($crate::dex::error::ErrorKind::$kind, &format!($fmtstr, $($args)*))
    };
    ($msg:literal) => {
        $crate::dex::error::DexError::new($msg)
    };
    ($fmtstr:literal, $($args:tt)*) => {
        $crate::dex::error::DexError::new(&format!($fmtstr, $($args)*))
    };
}


#[macro_export]
macro_rules! fail {
    ($kind:ident, $msg:literal) => {
        return Err($crate::dex::error::DexError::of($crate::dex::error::ErrorKind::$kind, $msg))
    };
    ($kind:ident, $fmtstr:literal, $($args:tt)*) => {
        return Err($crate::dex::error::DexError::of($crate::dex::error::ErrorKind::$kind, &format!($fmtstr, $($args)*)))
    };
    ($msg:literal) => {
        return Err($crate::dex::error::DexError::new($msg))
    };
    ($fmtstr:literal, $($args:tt)*) => {
        return Err($crate::dex::error::DexError::new(&format!($fmtstr, $($args)*)))
    };
}


/// Broad classification of a failure. Every failure is fatal for the container being
/// encoded; the kind only tells the caller which side (input or library) is at fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind
{
    /// Bytes being decoded do not follow the format.
    Malformed,
    /// A fixed-width field cannot hold the value it was given.
    Encoding,
    /// The in-memory model is inconsistent.
    InvalidModel,
    /// An instruction carries a reference kind the encoder does not know.
    UnrecognizedReference,
    /// A pool position was requested before the pool was written, or for an entry never interned.
    ContractViolation,
    Io,
}

#[derive(Debug, PartialEq, Eq)]
pub struct DexError
{
    kind: ErrorKind,
    msg: String,
    contexts: Vec<String>,
}

impl DexError
{
    pub(crate) fn new(msg: &str) -> Self
    {
        DexError::of(ErrorKind::Malformed, msg)
    }

    pub(crate) fn of(kind: ErrorKind, msg: &str) -> Self
    {
        DexError {
            kind,
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub(crate) fn with_context(base: DexError, context: String) -> Self
    {
        let mut contexts = base.contexts;
        contexts.push(context);
        DexError { kind: base.kind, msg: base.msg, contexts }
    }

    pub fn kind(&self) -> ErrorKind
    {
        self.kind
    }

    pub fn message(&self) -> &str
    {
        &self.msg
    }

    pub fn contexts(&self) -> &[String]
    {
        &self.contexts
    }
}

impl From<std::io::Error> for DexError
{
    fn from(e: std::io::Error) -> Self
    {
        DexError::of(ErrorKind::Io, &e.to_string())
    }
}

/// Attaches a lazily formatted context to the error side of a result.
pub(crate) trait ResultExt<T>
{
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T, DexError>;
}

impl<T> ResultExt<T> for Result<T, DexError>
{
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T, DexError>
    {
        self.map_err(|e| DexError::with_context(e, f()))
    }
}

impl fmt::Display for DexError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for DexError {}
