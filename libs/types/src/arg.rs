//! Closed argument type carried by every envelope
//!
//! Method arguments cross process boundaries as a list of [`Arg`] values. The
//! variant set is closed so the codec never has to guess at a payload, and
//! handlers recover their statically typed parameters through [`FromArgs`].
//!
//! ```rust
//! use hive_types::{args, Arg, FromArgs};
//!
//! let wire = args![42_i32, "hello"];
//! let (n, s): (i32, String) = FromArgs::from_args(wire).unwrap();
//! assert_eq!(n, 42);
//! assert_eq!(s, "hello");
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single tagged argument value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Arg {
    #[default]
    Unit,
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Arg>),
}

impl Arg {
    /// Variant name, used in mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Arg::Unit => "unit",
            Arg::Bool(_) => "bool",
            Arg::I32(_) => "i32",
            Arg::I64(_) => "i64",
            Arg::U32(_) => "u32",
            Arg::U64(_) => "u64",
            Arg::F64(_) => "f64",
            Arg::Str(_) => "str",
            Arg::Bytes(_) => "bytes",
            Arg::List(_) => "list",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Failure to turn a wire argument list into a handler's parameter tuple.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgError {
    #[error("argument {index}: expected {expected}, got {actual}")]
    Mismatch {
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("expected {expected} arguments, got {actual}")]
    Arity { expected: usize, actual: usize },
}

/// Extraction of one typed value from an [`Arg`].
pub trait FromArg: Sized {
    /// Variant name this type is decoded from.
    const KIND: &'static str;

    fn from_arg(arg: Arg) -> Option<Self>;
}

/// Conversion of one typed value into an [`Arg`].
pub trait IntoArg {
    fn into_arg(self) -> Arg;
}

/// Decoding of a whole argument list into a handler's parameter tuple.
pub trait FromArgs: Sized {
    fn from_args(args: Vec<Arg>) -> Result<Self, ArgError>;
}

/// Encoding of a handler result or call parameters into an argument list.
pub trait IntoArgs {
    fn into_args(self) -> Vec<Arg>;
}

macro_rules! scalar_arg {
    ($ty:ty, $variant:ident, $kind:literal) => {
        impl FromArg for $ty {
            const KIND: &'static str = $kind;

            fn from_arg(arg: Arg) -> Option<Self> {
                match arg {
                    Arg::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }

        impl IntoArg for $ty {
            fn into_arg(self) -> Arg {
                Arg::$variant(self)
            }
        }
    };
}

scalar_arg!(bool, Bool, "bool");
scalar_arg!(i32, I32, "i32");
scalar_arg!(i64, I64, "i64");
scalar_arg!(u32, U32, "u32");
scalar_arg!(u64, U64, "u64");
scalar_arg!(f64, F64, "f64");
scalar_arg!(String, Str, "str");
scalar_arg!(Vec<u8>, Bytes, "bytes");
scalar_arg!(Vec<Arg>, List, "list");

impl FromArg for () {
    const KIND: &'static str = "unit";

    fn from_arg(arg: Arg) -> Option<Self> {
        matches!(arg, Arg::Unit).then_some(())
    }
}

impl IntoArg for () {
    fn into_arg(self) -> Arg {
        Arg::Unit
    }
}

impl FromArg for Arg {
    const KIND: &'static str = "any";

    fn from_arg(arg: Arg) -> Option<Self> {
        Some(arg)
    }
}

impl IntoArg for Arg {
    fn into_arg(self) -> Arg {
        self
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> Arg {
        Arg::Str(self.to_string())
    }
}

impl IntoArg for &[u8] {
    fn into_arg(self) -> Arg {
        Arg::Bytes(self.to_vec())
    }
}

impl IntoArgs for Vec<Arg> {
    fn into_args(self) -> Vec<Arg> {
        self
    }
}

impl FromArgs for Vec<Arg> {
    fn from_args(args: Vec<Arg>) -> Result<Self, ArgError> {
        Ok(args)
    }
}

impl FromArgs for () {
    fn from_args(args: Vec<Arg>) -> Result<Self, ArgError> {
        if args.is_empty() {
            Ok(())
        } else {
            Err(ArgError::Arity {
                expected: 0,
                actual: args.len(),
            })
        }
    }
}

impl IntoArgs for () {
    fn into_args(self) -> Vec<Arg> {
        Vec::new()
    }
}

fn take<T: FromArg>(
    iter: &mut impl Iterator<Item = Arg>,
    index: usize,
    expected_len: usize,
) -> Result<T, ArgError> {
    let arg = iter.next().ok_or(ArgError::Arity {
        expected: expected_len,
        actual: index,
    })?;
    let actual = arg.kind();
    T::from_arg(arg).ok_or(ArgError::Mismatch {
        index,
        expected: T::KIND,
        actual,
    })
}

macro_rules! tuple_args {
    ($len:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name: FromArg),+> FromArgs for ($($name,)+) {
            fn from_args(args: Vec<Arg>) -> Result<Self, ArgError> {
                if args.len() != $len {
                    return Err(ArgError::Arity {
                        expected: $len,
                        actual: args.len(),
                    });
                }
                let mut iter = args.into_iter();
                Ok(($(take::<$name>(&mut iter, $idx, $len)?,)+))
            }
        }

        impl<$($name: IntoArg),+> IntoArgs for ($($name,)+) {
            fn into_args(self) -> Vec<Arg> {
                vec![$(self.$idx.into_arg()),+]
            }
        }
    };
}

tuple_args!(1; A: 0);
tuple_args!(2; A: 0, B: 1);
tuple_args!(3; A: 0, B: 1, C: 2);
tuple_args!(4; A: 0, B: 1, C: 2, D: 3);
tuple_args!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_args!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

/// Build a `Vec<Arg>` from heterogeneous values.
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Arg>::new()
    };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::IntoArg::into_arg($value)),+]
    };
}
