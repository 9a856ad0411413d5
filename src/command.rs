//! Wire-format commands.
//!
//! The collector speaks a line-oriented text protocol: each command is a
//! single newline-terminated ASCII line, led by the command keyword. Commands
//! are formatted once, at record time, and the resulting line is immutable
//! from then on.

use std::fmt;

/// The kind of a wire command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    /// A counter increment: `increment <name> <value> <time> <count>`.
    Increment,

    /// A gauge sample: `gauge <name> <value> <time> <count>`.
    Gauge,

    /// A freeform notice: `notice <time> <duration> <message>`.
    Notice,
}

impl CommandKind {
    /// Returns the leading keyword for this command kind.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Increment => "increment",
            CommandKind::Gauge => "gauge",
            CommandKind::Notice => "notice",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single formatted command, ready to be written to the collector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    kind: CommandKind,
    line: String,
}

impl Command {
    /// Builds an `increment` or `gauge` command.
    ///
    /// The caller is responsible for having validated `name` and `value`
    /// beforehand; this only formats.
    pub(crate) fn metric(kind: CommandKind, name: &str, value: f64, time: u64, count: u64) -> Self {
        let mut line = String::with_capacity(name.len() + 24);
        line.push_str(name);
        line.push(' ');
        push_value(&mut line, value);
        line.push(' ');
        line.push_str(itoa::Buffer::new().format(time));
        line.push(' ');
        line.push_str(itoa::Buffer::new().format(count));
        Command { kind, line }
    }

    /// Builds a `notice` command.
    ///
    /// The caller must have rejected messages containing a newline; an
    /// embedded newline would terminate the line early and leave the
    /// remainder to be parsed as a bogus follow-up command.
    pub(crate) fn notice(message: &str, time: u64, duration: f64) -> Self {
        let mut line = String::with_capacity(message.len() + 16);
        line.push_str(itoa::Buffer::new().format(time));
        line.push(' ');
        push_value(&mut line, duration);
        line.push(' ');
        line.push_str(message);
        Command { kind: CommandKind::Notice, line }
    }

    /// Returns the kind of this command.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Returns the formatted payload line, without the leading keyword or
    /// trailing newline.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Appends the full wire form (`<kind> <line>\n`) to `buf`.
    pub(crate) fn write_wire(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.kind.as_str().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.line.as_bytes());
        buf.push(b'\n');
    }
}

/// Renders a numeric value the way the collector expects: integral values
/// without a decimal point, everything else in shortest-round-trip decimal
/// form. No forced sign.
fn push_value(line: &mut String, value: f64) {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        line.push_str(itoa::Buffer::new().format(value as i64));
    } else {
        line.push_str(ryu::Buffer::new().format(value));
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{Command, CommandKind};

    fn wire(command: &Command) -> String {
        let mut buf = Vec::new();
        command.write_wire(&mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn formats_gauge() {
        let command = Command::metric(CommandKind::Gauge, "gauge_test", 123.0, 555, 111);
        assert_eq!(command.line(), "gauge_test 123 555 111");
        assert_eq!(wire(&command), "gauge gauge_test 123 555 111\n");
    }

    #[test]
    fn formats_increment() {
        let command = Command::metric(CommandKind::Increment, "increment_test", 2.0, 555, 1);
        assert_eq!(wire(&command), "increment increment_test 2 555 1\n");
    }

    #[test]
    fn renders_values_without_trailing_zero() {
        // Cases are defined as: value, expected rendering.
        let cases = [
            (1.0, "1"),
            (0.0, "0"),
            (-1.0, "-1"),
            (123.0, "123"),
            (-333.333, "-333.333"),
            (2.2, "2.2"),
            (0.5, "0.5"),
        ];
        for (value, expected) in cases {
            let command = Command::metric(CommandKind::Gauge, "v", value, 1, 1);
            assert_eq!(command.line(), format!("v {expected} 1 1"));
        }
    }

    #[test]
    fn formats_notice() {
        let command = Command::notice("Test note", 1234, 0.0);
        assert_eq!(command.line(), "1234 0 Test note");
        assert_eq!(wire(&command), "notice 1234 0 Test note\n");
    }

    #[test]
    fn notice_message_may_contain_spaces() {
        let command = Command::notice("deploy finished in 3 minutes", 99, 180.0);
        assert_eq!(command.line(), "99 180 deploy finished in 3 minutes");
    }

    proptest! {
        #[test]
        fn metric_lines_are_single_line(
            name in "[A-Za-z][A-Za-z0-9_.]{0,40}",
            value in proptest::num::f64::NORMAL | proptest::num::f64::ZERO,
            time in any::<u64>(),
            count in any::<u64>(),
        ) {
            let command = Command::metric(CommandKind::Increment, &name, value, time, count);
            let rendered = wire(&command);
            prop_assert!(rendered.ends_with('\n'));
            prop_assert_eq!(rendered.matches('\n').count(), 1);
            prop_assert_eq!(rendered.split(' ').count(), 5);
        }
    }
}
