/// Expands to the name of type `$t` as a string literal. The type must exist,
/// so renaming it without updating the call fails to compile.
macro_rules! name_of {
    ($t:ty) => {{
        type _T = $t;
        stringify!($t)
    }};
}
pub(crate) use name_of;
