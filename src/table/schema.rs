//! 表结构定义
//!
//! 由模型字段推导出的物理表描述，与具体方言无关

use crate::types::DataValue;

/// 列类型
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    /// 变长字符串
    Varchar { max_length: usize },
    /// 文本
    Text,
    /// 整数
    Integer,
    /// 大整数
    BigInteger,
    /// 双精度浮点数
    Double,
    /// 定点数
    Decimal { precision: u8, scale: u8 },
    /// 布尔
    Boolean,
    /// 日期
    Date,
    /// 带时区的日期时间
    DateTime,
    /// UUID
    Uuid,
    /// JSON
    Json,
    /// 二进制
    Binary,
}

/// 列定义
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    /// 列名
    pub name: String,
    /// 列类型
    pub column_type: ColumnType,
    /// 是否可空（主键永远不可空）
    pub nullable: bool,
    /// 是否主键
    pub primary_key: bool,
    /// 是否自增
    pub auto_increment: bool,
    /// 是否唯一
    pub unique: bool,
    /// 是否单列索引
    pub index: bool,
    /// 静态默认值，写入 DDL
    pub default_value: Option<DataValue>,
    /// 数据库端默认值表达式
    pub server_default: Option<String>,
    /// 注释
    pub comment: Option<String>,
}

/// 外键约束
#[derive(Debug, Clone)]
pub struct ForeignKeyDefinition {
    /// 约束名 `fk_{子表}_{目标表}_{目标主键}_{字段名}`
    pub name: String,
    pub column: String,
    pub target_table: String,
    /// 目标表所在 schema（目标为共享模型时为 None）
    pub target_schema: Option<String>,
    pub target_column: String,
    pub on_delete: String,
    pub on_update: String,
}

/// 约束类型
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintType {
    /// 多列唯一
    Unique,
}

/// 表级约束定义
#[derive(Debug, Clone)]
pub struct ConstraintDefinition {
    pub name: String,
    pub constraint_type: ConstraintType,
    pub columns: Vec<String>,
}

/// 索引定义
#[derive(Debug, Clone)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// 表结构
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// 表名
    pub name: String,
    /// 所在 schema，None 表示默认 schema
    pub schema: Option<String>,
    /// 列定义，顺序与模型字段声明顺序一致
    pub columns: Vec<ColumnDefinition>,
    /// 外键约束
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    /// 表级约束
    pub constraints: Vec<ConstraintDefinition>,
    /// 索引
    pub indexes: Vec<IndexDefinition>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, schema: Option<String>) -> Self {
        Self {
            name: name.into(),
            schema,
            columns: Vec::new(),
            foreign_keys: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// 按名称查找列
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// 主键列
    pub fn primary_key(&self) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.primary_key)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}
