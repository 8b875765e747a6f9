//! Styled views over render primitives.
//!
//! Color is a process-wide switch: structured protocol connections and the
//! `no_color` configuration turn it off for every renderer at once.

use crossterm::style::Stylize;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};

static COLORIZE: AtomicBool = AtomicBool::new(true);

pub fn set_colorize(enabled: bool) {
    COLORIZE.store(enabled, Ordering::Relaxed);
}

fn colorize() -> bool {
    COLORIZE.load(Ordering::Relaxed)
}

macro_rules! style_view {
    ($name: ident, $style: ident) => {
        pub struct $name<T: Display>(T);

        impl<T: Display> From<T> for $name<T> {
            fn from(value: T) -> Self {
                Self(value)
            }
        }

        impl<T: Display> Display for $name<T> {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                if colorize() {
                    write!(f, "{}", self.0.to_string().$style())
                } else {
                    self.0.fmt(f)
                }
            }
        }
    };
}

style_view!(FilePathView, cyan);
style_view!(FunctionNameView, blue);
style_view!(KeywordView, cyan);
style_view!(LineNoView, dim);
style_view!(ErrorView, red);
style_view!(ReturnValueView, magenta);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_no_color_passthrough() {
        set_colorize(false);
        assert_eq!(FilePathView::from("a.src").to_string(), "a.src");
        assert_eq!(LineNoView::from(12).to_string(), "12");
    }
}
