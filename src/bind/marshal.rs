//! Conversions between native values and stack slots
//!
//! `ToStack` pushes a native value, `FromStack` reads one back. Both carry
//! a static `Kind` tag so every export can record its signature. Types
//! without an implementation cannot be used as arguments or results.

use std::ffi::c_void;
use std::fmt;

use crate::bind::args::FromArgs;
use crate::bind::class::ExportClass;
use crate::bind::object::Object;
use crate::context::Context;
use crate::error::{Error, Result};

/// Closed set of marshallable kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Number,
    String,
    Boolean,
    /// Handle of an exported class instance
    Object,
    /// Opaque host pointer
    RawPointer,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Boolean => "boolean",
            Kind::Object => "object",
            Kind::RawPointer => "pointer",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value that can be pushed onto the stack
pub trait ToStack {
    const KIND: Kind;

    fn push(self, cx: &mut Context<'_>) -> Result<()>;
}

/// A value that can be read from a stack slot
pub trait FromStack: Sized {
    const KIND: Kind;

    fn read(cx: &Context<'_>, index: i32) -> Result<Self>;
}

/// Opaque host pointer passed through the VM without ownership
#[derive(Debug, PartialEq, Eq)]
pub struct RawPtr<T>(pub *mut T);

impl<T> Clone for RawPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RawPtr<T> {}

impl ToStack for f64 {
    const KIND: Kind = Kind::Number;

    fn push(self, cx: &mut Context<'_>) -> Result<()> {
        cx.push_number(self)
    }
}

impl FromStack for f64 {
    const KIND: Kind = Kind::Number;

    fn read(cx: &Context<'_>, index: i32) -> Result<Self> {
        cx.to_number(index)
    }
}

impl ToStack for f32 {
    const KIND: Kind = Kind::Number;

    fn push(self, cx: &mut Context<'_>) -> Result<()> {
        cx.push_number(self as f64)
    }
}

impl FromStack for f32 {
    const KIND: Kind = Kind::Number;

    /// Fails when a finite number is out of `f32` range
    fn read(cx: &Context<'_>, index: i32) -> Result<Self> {
        let n = cx.to_number(index)?;
        let narrowed = n as f32;
        if narrowed.is_infinite() && n.is_finite() {
            return Err(Error::TypeMismatch {
                op: "read",
                expected: "f32",
                found: format!("number {}", n),
            });
        }
        Ok(narrowed)
    }
}

/// Integers travel as numbers; reads require an integral value in range.
/// 64-bit values beyond 2^53 lose precision on the way in.
macro_rules! impl_integer {
    ($($t:ty),*) => {
        $(
            impl ToStack for $t {
                const KIND: Kind = Kind::Number;

                fn push(self, cx: &mut Context<'_>) -> Result<()> {
                    cx.push_number(self as f64)
                }
            }

            impl FromStack for $t {
                const KIND: Kind = Kind::Number;

                fn read(cx: &Context<'_>, index: i32) -> Result<Self> {
                    let n = cx.to_number(index)?;
                    // `MAX as f64 + 1.0` is an exact exclusive bound for every width
                    if n.fract() == 0.0 && n >= <$t>::MIN as f64 && n < <$t>::MAX as f64 + 1.0 {
                        Ok(n as $t)
                    } else {
                        Err(Error::TypeMismatch {
                            op: "read",
                            expected: stringify!($t),
                            found: format!("number {}", n),
                        })
                    }
                }
            }
        )*
    };
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl ToStack for bool {
    const KIND: Kind = Kind::Boolean;

    fn push(self, cx: &mut Context<'_>) -> Result<()> {
        cx.push_boolean(self)
    }
}

impl FromStack for bool {
    const KIND: Kind = Kind::Boolean;

    fn read(cx: &Context<'_>, index: i32) -> Result<Self> {
        cx.to_boolean(index)
    }
}

impl ToStack for String {
    const KIND: Kind = Kind::String;

    fn push(self, cx: &mut Context<'_>) -> Result<()> {
        cx.push_string(&self)
    }
}

impl ToStack for &str {
    const KIND: Kind = Kind::String;

    fn push(self, cx: &mut Context<'_>) -> Result<()> {
        cx.push_string(self)
    }
}

impl FromStack for String {
    const KIND: Kind = Kind::String;

    fn read(cx: &Context<'_>, index: i32) -> Result<Self> {
        cx.to_string(index)
    }
}

impl<T> ToStack for RawPtr<T> {
    const KIND: Kind = Kind::RawPointer;

    fn push(self, cx: &mut Context<'_>) -> Result<()> {
        cx.push_pointer(self.0 as *mut c_void)
    }
}

impl<T> FromStack for RawPtr<T> {
    const KIND: Kind = Kind::RawPointer;

    fn read(cx: &Context<'_>, index: i32) -> Result<Self> {
        cx.to_pointer(index).map(|p| RawPtr(p as *mut T))
    }
}

impl<T: ExportClass> ToStack for Object<T> {
    const KIND: Kind = Kind::Object;

    fn push(self, cx: &mut Context<'_>) -> Result<()> {
        cx.wrap(&self)
    }
}

impl<T: ExportClass> FromStack for Object<T> {
    const KIND: Kind = Kind::Object;

    fn read(cx: &Context<'_>, index: i32) -> Result<Self> {
        cx.object::<T>(index)
    }
}

/// What an exported callable may return
pub trait Returns {
    /// Kind of the single result, `None` for no result
    const KIND: Option<Kind>;

    /// Push the results; returns how many were pushed
    fn push_returns(self, cx: &mut Context<'_>) -> Result<usize>;
}

impl Returns for () {
    const KIND: Option<Kind> = None;

    fn push_returns(self, _: &mut Context<'_>) -> Result<usize> {
        Ok(0)
    }
}

impl<T: ToStack> Returns for T {
    const KIND: Option<Kind> = Some(T::KIND);

    fn push_returns(self, cx: &mut Context<'_>) -> Result<usize> {
        self.push(cx)?;
        Ok(1)
    }
}

/// A native failure becomes a script error
impl<R: Returns> Returns for Result<R, Error> {
    const KIND: Option<Kind> = R::KIND;

    fn push_returns(self, cx: &mut Context<'_>) -> Result<usize> {
        self?.push_returns(cx)
    }
}

/// Argument and result kinds of an export
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub args: Vec<Kind>,
    pub returns: Option<Kind>,
}

impl Signature {
    /// Signature of a callable taking `Args` and returning `R`
    pub fn of<Args: FromArgs, R: Returns>() -> Self {
        Signature {
            args: Args::kinds(),
            returns: R::KIND,
        }
    }

    /// Signature of a method: the receiver comes first
    pub fn method<Args: FromArgs, R: Returns>() -> Self {
        let mut signature = Self::of::<Args, R>();
        signature.args.insert(0, Kind::Object);
        signature
    }

    /// Arity not known statically
    pub fn raw() -> Self {
        Self::default()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, kind) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", kind)?;
        }
        write!(f, ")")?;
        if let Some(kind) = self.returns {
            write!(f, " -> {}", kind)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip<T: ToStack + FromStack>(cx: &mut Context<'_>, value: T) -> T {
        value.push(cx).unwrap();
        let back = T::read(cx, -1).unwrap();
        cx.pop(1).unwrap();
        back
    }

    #[test]
    fn test_scalar_edge_cases() {
        let mut cx = Context::new();
        assert_eq!(round_trip(&mut cx, 0.0f64), 0.0);
        assert_eq!(round_trip(&mut cx, -1.5f64), -1.5);
        assert_eq!(round_trip(&mut cx, 0i32), 0);
        assert_eq!(round_trip(&mut cx, -7i64), -7);
        assert_eq!(round_trip(&mut cx, u8::MAX), u8::MAX);
        assert_eq!(round_trip(&mut cx, String::new()), "");
        let long = "x".repeat(10_000);
        assert_eq!(round_trip(&mut cx, long.clone()), long);
        assert!(!round_trip(&mut cx, false));
        assert_eq!(cx.depth(), 0);
    }

    #[test]
    fn test_integer_reads_are_strict() {
        let mut cx = Context::new();
        cx.push_number(1.5).unwrap();
        assert!(matches!(
            i32::read(&cx, -1),
            Err(Error::TypeMismatch { expected: "i32", .. })
        ));

        cx.push_number(256.0).unwrap();
        assert!(u8::read(&cx, -1).is_err());
        assert_eq!(u16::read(&cx, -1).unwrap(), 256);

        cx.push_number(-1.0).unwrap();
        assert!(u32::read(&cx, -1).is_err());
        assert_eq!(i8::read(&cx, -1).unwrap(), -1);

        cx.push_number(9.3e18).unwrap();
        assert!(i64::read(&cx, -1).is_err());
        assert!(u64::read(&cx, -1).is_ok());
    }

    #[test]
    fn test_f32_reads_reject_overflow() {
        let mut cx = Context::new();
        cx.push_number(1e300).unwrap();
        assert!(matches!(
            f32::read(&cx, -1),
            Err(Error::TypeMismatch { op: "read", expected: "f32", .. })
        ));

        cx.push_number(f64::INFINITY).unwrap();
        assert_eq!(f32::read(&cx, -1).unwrap(), f32::INFINITY);
        cx.push_number(0.5).unwrap();
        assert_eq!(f32::read(&cx, -1).unwrap(), 0.5);
    }

    #[test]
    fn test_wrong_kind_is_mismatch() {
        let mut cx = Context::new();
        cx.push_string("1").unwrap();
        assert!(matches!(f64::read(&cx, 1), Err(Error::TypeMismatch { .. })));
        assert!(matches!(bool::read(&cx, 1), Err(Error::TypeMismatch { .. })));
        assert!(matches!(
            String::read(&cx, 2),
            Err(Error::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_raw_pointer() {
        let mut cx = Context::new();
        let mut target = 5u32;
        let ptr = RawPtr(&mut target as *mut u32);
        assert_eq!(round_trip(&mut cx, ptr), ptr);
    }

    #[test]
    fn test_returns() {
        let mut cx = Context::new();
        assert_eq!(().push_returns(&mut cx).unwrap(), 0);
        assert_eq!(3.0f64.push_returns(&mut cx).unwrap(), 1);
        assert_eq!(Ok::<_, Error>("x").push_returns(&mut cx).unwrap(), 1);
        assert_eq!(
            Err::<f64, _>(Error::runtime("nope")).push_returns(&mut cx),
            Err(Error::runtime("nope"))
        );
        assert_eq!(cx.depth(), 2);
    }

    #[test]
    fn test_signature_display() {
        let signature = Signature::of::<(f64, String), bool>();
        assert_eq!(signature.to_string(), "(number, string) -> boolean");
        assert_eq!(Signature::of::<(), ()>().to_string(), "()");
        assert_eq!(
            Signature::method::<(i32,), ()>().args,
            vec![Kind::Object, Kind::Number]
        );
    }

    proptest! {
        #[test]
        fn test_number_round_trip(n in any::<f64>().prop_filter("not NaN", |n| !n.is_nan())) {
            let mut cx = Context::new();
            prop_assert_eq!(round_trip(&mut cx, n), n);
        }

        #[test]
        fn test_integer_round_trip(n in any::<i32>()) {
            let mut cx = Context::new();
            prop_assert_eq!(round_trip(&mut cx, n), n);
        }

        #[test]
        fn test_string_round_trip(s in ".*") {
            let mut cx = Context::new();
            prop_assert_eq!(round_trip(&mut cx, s.clone()), s);
        }
    }
}
