//! 模型元数据

use crate::fields::Field;
use crate::registry::Registry;
use std::sync::{Arc, Weak};

/// 多列唯一约束声明
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniqueTogether {
    /// 单个字段名
    Field(String),
    /// 一组字段名
    Fields(Vec<String>),
    /// 带名称的约束
    Constraint { name: String, fields: Vec<String> },
}

impl UniqueTogether {
    /// 约束涉及的字段
    pub fn fields(&self) -> Vec<String> {
        match self {
            UniqueTogether::Field(f) => vec![f.clone()],
            UniqueTogether::Fields(fs) => fs.clone(),
            UniqueTogether::Constraint { fields, .. } => fields.clone(),
        }
    }

    /// 创建带名称的唯一约束
    pub fn constraint(name: &str, fields: &[&str]) -> Self {
        UniqueTogether::Constraint {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl From<&str> for UniqueTogether {
    fn from(value: &str) -> Self {
        UniqueTogether::Field(value.to_string())
    }
}

impl From<Vec<&str>> for UniqueTogether {
    fn from(value: Vec<&str>) -> Self {
        UniqueTogether::Fields(value.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for UniqueTogether {
    fn from(value: [&str; N]) -> Self {
        UniqueTogether::Fields(value.iter().map(|s| s.to_string()).collect())
    }
}

/// 索引声明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    /// 索引名，未指定时自动生成 `idx_{表名}_{字段...}`
    pub name: Option<String>,
    pub fields: Vec<String>,
    pub unique: bool,
}

impl Index {
    pub fn new(fields: &[&str]) -> Self {
        Self {
            name: None,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique: false,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// 模型元数据
///
/// 字段顺序：继承字段在前，自身声明的字段在后
#[derive(Clone)]
pub struct MetaInfo {
    /// 表名，抽象模型为 None
    pub table_name: Option<String>,
    /// 是否抽象模型
    pub is_abstract: bool,
    /// 所属注册表（非拥有引用）
    pub registry: Weak<Registry>,
    /// 字段列表
    pub fields: Vec<Field>,
    /// 主键字段名
    pub pk_name: Option<String>,
    pub unique_together: Vec<UniqueTogether>,
    pub indexes: Vec<Index>,
    /// 普通外键字段名
    pub foreign_keys: Vec<String>,
    /// 一对一字段名
    pub one_to_one: Vec<String>,
    /// 多对多字段名
    pub many_to_many: Vec<String>,
    /// 租户模型：在每个租户 schema 中各建一份表
    pub is_tenant: bool,
    /// 反射模型：表由外部维护，不参与 create_all/drop_all
    pub reflected: bool,
    /// 代理模型对应的原始模型名
    pub proxy_for: Option<String>,
}

impl Default for MetaInfo {
    fn default() -> Self {
        Self {
            table_name: None,
            is_abstract: false,
            registry: Weak::new(),
            fields: Vec::new(),
            pk_name: None,
            unique_together: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            one_to_one: Vec::new(),
            many_to_many: Vec::new(),
            is_tenant: false,
            reflected: false,
            proxy_for: None,
        }
    }
}

impl MetaInfo {
    /// 按名称查找字段
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// 注册表是否仍然存活
    pub fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.upgrade()
    }

    /// 所有关系字段名（外键、一对一、多对多）
    pub fn relation_names(&self) -> impl Iterator<Item = &String> {
        self.foreign_keys
            .iter()
            .chain(self.one_to_one.iter())
            .chain(self.many_to_many.iter())
    }
}

impl std::fmt::Debug for MetaInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaInfo")
            .field("table_name", &self.table_name)
            .field("is_abstract", &self.is_abstract)
            .field(
                "fields",
                &self.fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            )
            .field("pk_name", &self.pk_name)
            .field("is_tenant", &self.is_tenant)
            .field("reflected", &self.reflected)
            .finish()
    }
}

/// 默认表名：类名小写加复数后缀
pub fn default_table_name(model_name: &str) -> String {
    format!("{}s", model_name.to_lowercase())
}

/// 默认反向关联名 `{模型名小写}s_set`
pub fn default_related_name(model_name: &str) -> String {
    format!("{}s_set", model_name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        assert_eq!(default_table_name("User"), "users");
        assert_eq!(default_related_name("BlogPost"), "blogposts_set");
    }

    #[test]
    fn test_unique_together_conversions() {
        assert_eq!(
            UniqueTogether::from(["a", "b"]).fields(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(UniqueTogether::from("a").fields(), vec!["a".to_string()]);
    }
}
