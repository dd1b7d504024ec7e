//! Colored progress logging, carried over from the teacher's `pretty_printing`
//! module. The teacher's own `log()` hand-rolls ANSI escapes rather than
//! reaching for `console` (it saves that crate for the dashboard's
//! cursor-addressed stats screen, which is out of this crate's scope); we
//! follow the same split rather than introducing a `log`/`tracing` backend,
//! since this fuzzer's worker processes are short-lived and print their own
//! status directly.

use core::fmt;

/// Different log-types that can be used to print out messages in different colors.
pub enum LogType {
    Neutral,
    Success,
    Failure,
}

struct Green<'a>(&'a str);
impl fmt::Display for Green<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\x1B[32m{}\x1B[0m", self.0)
    }
}

struct Blue<'a>(&'a str);
impl fmt::Display for Blue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\x1B[34m{}\x1B[0m", self.0)
    }
}

struct Red<'a>(&'a str);
impl fmt::Display for Red<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\x1B[31m{}\x1B[0m", self.0)
    }
}

/// Print a colored, prefixed log line to stderr.
pub fn log(kind: LogType, msg: &str) {
    match kind {
        LogType::Neutral => eprintln!("{} {}", Blue("[-]"), msg),
        LogType::Success => eprintln!("{} {}", Green("[+]"), msg),
        LogType::Failure => eprintln!("{} {}", Red("[!]"), msg),
    }
}
