#![allow(unused_macros)]
//! Console output and error construction helpers shared by the library and
//! the three command line tools.

#[macro_export]
macro_rules! verbose_println {
    ($($p:expr),+) => {
        if $crate::config::verbose() {
            println!($($p),+);
        }
    }
}
#[macro_export]
macro_rules! info {
    ($($p:expr),+) => {
        println!(concat!($crate::blue!("INFO"),": {}"),format_args!($($p),+))
    }
}
#[macro_export]
macro_rules! warn {
    ($($p:expr),+) => {
        println!(concat!($crate::yellow!("WARNING"),": {}"),format_args!($($p),+))
    }
}
#[macro_export]
macro_rules! general_err {
    ($($msg:expr),+) => {
        $crate::Error::new($crate::ErrorKind::General, None, format!($($msg),+).as_str())
    };
}
#[macro_export]
macro_rules! format_err {
    ($($msg:expr),+) => {
        $crate::Error::new($crate::ErrorKind::Format, None, format!($($msg),+).as_str())
    };
}
#[macro_export]
macro_rules! syntax_err {
    ($pos:expr, $($msg:expr),+) => {
        $crate::Error::new($crate::ErrorKind::Syntax, Some($pos), format!($($msg),+).as_str())
    };
}
#[macro_export]
macro_rules! usage_err {
    ($pos:expr, $($msg:expr),+) => {
        $crate::Error::new($crate::ErrorKind::AddressUsage, Some($pos), format!($($msg),+).as_str())
    };
}
#[macro_export]
macro_rules! color {
    ($color: literal, $msg: expr) => {
        concat!("\x1b[", $color, "m", $msg, "\x1b[0m")
    };
}
#[macro_export]
macro_rules! red {
    ($msg:expr) => {
        $crate::color!(91, $msg)
    };
}
#[macro_export]
macro_rules! green {
    ($msg:expr) => {
        $crate::color!(92, $msg)
    };
}
#[macro_export]
macro_rules! yellow {
    ($msg:expr) => {
        $crate::color!(93, $msg)
    };
}
#[macro_export]
macro_rules! blue {
    ($msg:expr) => {
        $crate::color!(94, $msg)
    };
}
