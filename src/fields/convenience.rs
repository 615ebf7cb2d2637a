//! 字段便捷函数模块
//!
//! 提供创建各种字段类型的便捷函数

use super::{Field, FieldType, ForeignKeyInfo, ManyToManyInfo, ModelRef, ReferentialAction};

/// 便捷函数：创建字符串字段
pub fn char_field(max_length: usize) -> Field {
    Field::new(FieldType::Char {
        max_length,
        min_length: None,
        regex: None,
    })
}

/// 便捷函数：创建文本字段
pub fn text_field() -> Field {
    Field::new(FieldType::Text)
}

/// 便捷函数：创建邮箱字段
pub fn email_field() -> Field {
    Field::new(FieldType::Email { max_length: 255 })
}

/// 便捷函数：创建整数字段
pub fn integer_field() -> Field {
    Field::new(FieldType::Integer {
        min_value: None,
        max_value: None,
    })
}

/// 便捷函数：创建大整数字段
pub fn big_integer_field() -> Field {
    Field::new(FieldType::BigInteger {
        min_value: None,
        max_value: None,
    })
}

/// 便捷函数：创建浮点数字段
pub fn float_field() -> Field {
    Field::new(FieldType::Float {
        min_value: None,
        max_value: None,
    })
}

/// 便捷函数：创建十进制字段
pub fn decimal_field(max_digits: u8, decimal_places: u8) -> Field {
    Field::new(FieldType::Decimal {
        max_digits,
        decimal_places,
    })
}

/// 便捷函数：创建布尔字段
pub fn boolean_field() -> Field {
    Field::new(FieldType::Boolean)
}

/// 便捷函数：创建日期字段
pub fn date_field() -> Field {
    Field::new(FieldType::Date {
        auto_now: false,
        auto_now_add: false,
    })
}

/// 便捷函数：创建日期时间字段
pub fn datetime_field() -> Field {
    Field::new(FieldType::DateTime {
        auto_now: false,
        auto_now_add: false,
    })
}

/// 便捷函数：创建UUID字段
pub fn uuid_field() -> Field {
    Field::new(FieldType::Uuid)
}

/// 便捷函数：创建JSON字段
pub fn json_field() -> Field {
    Field::new(FieldType::Json)
}

/// 便捷函数：创建二进制字段
pub fn binary_field() -> Field {
    Field::new(FieldType::Binary { max_length: None })
}

/// 便捷函数：创建外键字段，默认级联删除/更新
pub fn foreign_key(target: impl Into<ModelRef>) -> Field {
    Field::new(FieldType::ForeignKey(ForeignKeyInfo {
        target: target.into(),
        on_delete: ReferentialAction::Cascade,
        on_update: ReferentialAction::Cascade,
        related_name: None,
        one_to_one: false,
    }))
}

/// 便捷函数：创建一对一字段（外键 + 唯一）
pub fn one_to_one(target: impl Into<ModelRef>) -> Field {
    let mut field = Field::new(FieldType::ForeignKey(ForeignKeyInfo {
        target: target.into(),
        on_delete: ReferentialAction::Cascade,
        on_update: ReferentialAction::Cascade,
        related_name: None,
        one_to_one: true,
    }));
    field.unique = true;
    field
}

/// 便捷函数：创建多对多字段
pub fn many_to_many(target: impl Into<ModelRef>) -> Field {
    Field::new(FieldType::ManyToMany(ManyToManyInfo {
        target: target.into(),
        through: None,
        related_name: None,
    }))
}
