//! Clause fragments and the reducer that normalizes fluent arguments.
//!
//! Every variadic builder call (`select`, `where`, `group_by`, `order_by`,
//! `join`, `update`) folds its arguments through [`reduce`] before the result
//! is appended to the query state.

use std::collections::BTreeMap;
use std::fmt::Display;

/// One argument passed to a variadic builder method.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// A single number or string, appended as one fragment.
    Fragment(String),
    /// A sequence, flattened one level into the accumulator.
    List(Vec<String>),
    /// Keyed conditions rendered as `"<key> <value>"`, e.g. `("age", "> 18")`.
    Conditions(Vec<(String, String)>),
}

impl Clause {
    /// Build keyed conditions, keeping the order of `pairs`.
    pub fn conditions<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Clause::Conditions(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Fold one argument into the accumulator.
///
/// Scalars are appended and sequences are flattened one level. Keyed
/// conditions do NOT append: they replace everything accumulated so far in
/// the current call with their own fragments. Fragments already stored in
/// the query state are unaffected.
pub fn reduce(mut acc: Vec<String>, clause: Clause) -> Vec<String> {
    match clause {
        Clause::Fragment(fragment) => {
            acc.push(fragment);
            acc
        }
        Clause::List(items) => {
            acc.extend(items);
            acc
        }
        Clause::Conditions(pairs) => pairs
            .into_iter()
            .map(|(key, value)| format!("{} {}", key, value))
            .collect(),
    }
}

/// Reduce all arguments of one builder call, starting from an empty accumulator.
pub fn reduce_all<I>(args: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<Clause>,
{
    args.into_iter().map(Into::into).fold(Vec::new(), reduce)
}

/// Collect heterogeneous builder arguments into a `Vec<Clause>`.
///
/// ```
/// use polysql::clauses;
/// let args = clauses!["a = 1", vec!["b = 2", "c = 3"], 4];
/// assert_eq!(polysql::query::reduce_all(args).len(), 4);
/// ```
#[macro_export]
macro_rules! clauses {
    () => {
        Vec::<$crate::query::Clause>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        vec![$($crate::query::Clause::from($arg)),+]
    };
}

impl From<String> for Clause {
    fn from(v: String) -> Self {
        Clause::Fragment(v)
    }
}

impl From<&str> for Clause {
    fn from(v: &str) -> Self {
        Clause::Fragment(v.to_string())
    }
}

impl From<&String> for Clause {
    fn from(v: &String) -> Self {
        Clause::Fragment(v.clone())
    }
}

macro_rules! numeric_fragment {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Clause {
                fn from(v: $ty) -> Self {
                    Clause::Fragment(v.to_string())
                }
            }
        )*
    };
}

numeric_fragment!(i32, i64, u32, u64, usize, f32, f64);

impl<T: Display> From<Vec<T>> for Clause {
    fn from(v: Vec<T>) -> Self {
        Clause::List(v.iter().map(ToString::to_string).collect())
    }
}

impl<T: Display, const N: usize> From<[T; N]> for Clause {
    fn from(v: [T; N]) -> Self {
        Clause::List(v.iter().map(ToString::to_string).collect())
    }
}

impl<T: Display> From<&[T]> for Clause {
    fn from(v: &[T]) -> Self {
        Clause::List(v.iter().map(ToString::to_string).collect())
    }
}

impl<K: Into<String>, V: Into<String>> From<BTreeMap<K, V>> for Clause {
    fn from(v: BTreeMap<K, V>) -> Self {
        Clause::conditions(v)
    }
}
