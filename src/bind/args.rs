//! Typed argument lists
//!
//! `FromArgs` reads a run of consecutive slots into a tuple, one slot per
//! element, left to right. `Function`, `Method` and `MethodRef` apply a
//! Rust callable to such a tuple, so an export keeps its natural signature.

use crate::bind::marshal::{FromStack, Kind};
use crate::context::Context;
use crate::error::Result;

/// A tuple of up to eight `FromStack` values
pub trait FromArgs: Sized {
    const ARITY: usize;

    /// Kinds of the elements, in order
    fn kinds() -> Vec<Kind>;

    /// Read `ARITY` slots starting at `start`
    fn from_args(cx: &Context<'_>, start: i32) -> Result<Self>;
}

/// A callable applied to a whole argument tuple
pub trait Function<Args, R> {
    fn call(&self, args: Args) -> R;
}

/// A callable applied to a receiver and an argument tuple
pub trait Method<T, Args, R> {
    fn call(&self, this: &mut T, args: Args) -> R;
}

/// A callable applied to a shared receiver and an argument tuple
pub trait MethodRef<T, Args, R> {
    fn call(&self, this: &T, args: Args) -> R;
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

macro_rules! impl_args {
    ($($arg:ident),*) => {
        impl<$($arg: FromStack),*> FromArgs for ($($arg,)*) {
            const ARITY: usize = count!($($arg)*);

            fn kinds() -> Vec<Kind> {
                vec![$($arg::KIND),*]
            }

            #[allow(non_snake_case, unused_variables, unused_mut, unused_assignments)]
            fn from_args(cx: &Context<'_>, start: i32) -> Result<Self> {
                let mut index = start;
                $(
                    let $arg = $arg::read(cx, index)?;
                    index += 1;
                )*
                Ok(($($arg,)*))
            }
        }

        impl<Func, Ret, $($arg),*> Function<($($arg,)*), Ret> for Func
        where
            Func: Fn($($arg),*) -> Ret,
        {
            #[allow(non_snake_case)]
            fn call(&self, ($($arg,)*): ($($arg,)*)) -> Ret {
                self($($arg),*)
            }
        }

        impl<Func, This, Ret, $($arg),*> Method<This, ($($arg,)*), Ret> for Func
        where
            Func: Fn(&mut This, $($arg),*) -> Ret,
        {
            #[allow(non_snake_case)]
            fn call(&self, this: &mut This, ($($arg,)*): ($($arg,)*)) -> Ret {
                self(this, $($arg),*)
            }
        }

        impl<Func, This, Ret, $($arg),*> MethodRef<This, ($($arg,)*), Ret> for Func
        where
            Func: Fn(&This, $($arg),*) -> Ret,
        {
            #[allow(non_snake_case)]
            fn call(&self, this: &This, ($($arg,)*): ($($arg,)*)) -> Ret {
                self(this, $($arg),*)
            }
        }
    };
}

impl_args!();
impl_args!(A1);
impl_args!(A1, A2);
impl_args!(A1, A2, A3);
impl_args!(A1, A2, A3, A4);
impl_args!(A1, A2, A3, A4, A5);
impl_args!(A1, A2, A3, A4, A5, A6);
impl_args!(A1, A2, A3, A4, A5, A6, A7);
impl_args!(A1, A2, A3, A4, A5, A6, A7, A8);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_collect_tuple() {
        let mut cx = Context::new();
        cx.push_string("skip").unwrap();
        cx.push_number(3.0).unwrap();
        cx.push_string("four").unwrap();
        cx.push_boolean(true).unwrap();

        let (a, b, c) = <(i32, String, bool)>::from_args(&cx, 2).unwrap();
        assert_eq!((a, b.as_str(), c), (3, "four", true));
        assert_eq!(<(i32, String, bool)>::ARITY, 3);
        assert_eq!(cx.depth(), 4);
    }

    #[test]
    fn test_empty_tuple() {
        let cx = Context::new();
        assert!(<()>::from_args(&cx, 1).is_ok());
        assert!(<()>::kinds().is_empty());
    }

    #[test]
    fn test_missing_argument() {
        let mut cx = Context::new();
        cx.push_number(1.0).unwrap();
        assert_eq!(
            <(f64, f64)>::from_args(&cx, 1),
            Err(Error::ProtocolViolation {
                op: "to_number",
                index: 2,
                depth: 1
            })
        );
    }

    #[test]
    fn test_apply() {
        let add = |a: f64, b: f64| a + b;
        assert_eq!(Function::call(&add, (3.0, 4.0)), 7.0);

        let bump = |n: &mut i32, by: i32| *n += by;
        let mut n = 1;
        Method::call(&bump, &mut n, (2,));
        assert_eq!(n, 3);

        let scaled = |n: &i32, by: i32| *n * by;
        assert_eq!(MethodRef::call(&scaled, &n, (2,)), 6);
    }

    #[test]
    fn test_eight_arguments() {
        let mut cx = Context::new();
        for i in 1..=8 {
            cx.push_number(i as f64).unwrap();
        }
        let sum = |a: u8, b: u8, c: u8, d: u8, e: u8, f: u8, g: u8, h: u8| {
            [a, b, c, d, e, f, g, h].iter().map(|&x| x as u32).sum::<u32>()
        };
        let args: (u8, u8, u8, u8, u8, u8, u8, u8) = FromArgs::from_args(&cx, 1).unwrap();
        assert_eq!(Function::call(&sum, args), 36);
    }
}
