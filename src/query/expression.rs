//! 过滤表达式
//!
//! `Q` 是可组合的过滤条件树，叶子是 `键 = 值` 形式的查找

use crate::types::DataValue;
use std::ops::{BitAnd, BitOr, Not};

/// 过滤条件
#[derive(Debug, Clone, PartialEq)]
pub enum Q {
    /// 单个查找，例如 `("author__name__icontains", "adam")`
    Lookup(String, DataValue),
    /// 所有子条件同时成立
    And(Vec<Q>),
    /// 任一子条件成立
    Or(Vec<Q>),
    /// 取反
    Not(Box<Q>),
}

impl Q {
    /// 单个查找
    pub fn new(key: impl Into<String>, value: impl Into<DataValue>) -> Self {
        Q::Lookup(key.into(), value.into())
    }

    /// 多个查找的合取
    pub fn all<I, K, V>(kwargs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        Q::And(
            kwargs
                .into_iter()
                .map(|(k, v)| Q::Lookup(k.into(), v.into()))
                .collect(),
        )
    }

    /// 多个查找的析取
    pub fn any<I, K, V>(kwargs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        Q::Or(
            kwargs
                .into_iter()
                .map(|(k, v)| Q::Lookup(k.into(), v.into()))
                .collect(),
        )
    }

    /// 不含任何查找
    pub fn is_empty(&self) -> bool {
        match self {
            Q::Lookup(..) => false,
            Q::And(children) | Q::Or(children) => children.iter().all(Q::is_empty),
            Q::Not(inner) => inner.is_empty(),
        }
    }

    /// 收集所有查找键
    pub(crate) fn keys(&self, out: &mut Vec<String>) {
        match self {
            Q::Lookup(key, _) => out.push(key.clone()),
            Q::And(children) | Q::Or(children) => {
                for child in children {
                    child.keys(out);
                }
            }
            Q::Not(inner) => inner.keys(out),
        }
    }
}

impl BitAnd for Q {
    type Output = Q;

    fn bitand(self, rhs: Q) -> Q {
        match (self, rhs) {
            (Q::And(mut left), Q::And(right)) => {
                left.extend(right);
                Q::And(left)
            }
            (Q::And(mut left), right) => {
                left.push(right);
                Q::And(left)
            }
            (left, right) => Q::And(vec![left, right]),
        }
    }
}

impl BitOr for Q {
    type Output = Q;

    fn bitor(self, rhs: Q) -> Q {
        match (self, rhs) {
            (Q::Or(mut left), Q::Or(right)) => {
                left.extend(right);
                Q::Or(left)
            }
            (Q::Or(mut left), right) => {
                left.push(right);
                Q::Or(left)
            }
            (left, right) => Q::Or(vec![left, right]),
        }
    }
}

impl Not for Q {
    type Output = Q;

    fn not(self) -> Q {
        match self {
            Q::Not(inner) => *inner,
            other => Q::Not(Box::new(other)),
        }
    }
}

/// 构建查找参数列表
///
/// ```
/// use rat_quickorm::kwargs;
/// let args = kwargs!(name = "Adam", age__gte = 18);
/// assert_eq!(args.len(), 2);
/// ```
#[macro_export]
macro_rules! kwargs {
    () => {
        ::std::vec::Vec::<(::std::string::String, $crate::types::DataValue)>::new()
    };
    ($($key:ident = $value:expr),+ $(,)?) => {
        vec![$((stringify!($key).to_string(), $crate::types::DataValue::from($value))),+]
    };
}
