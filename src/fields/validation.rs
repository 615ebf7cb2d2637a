//! 载荷验证
//!
//! 按字段声明校验 `字段名 -> 值` 映射，收集所有出错字段后统一返回

use super::Field;
use crate::error::{FieldError, OrmError, OrmResult};
use crate::types::{DataValue, Row};
use once_cell::sync::Lazy;
use regex::Regex;

pub(crate) static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$")
        .unwrap_or_else(|_| unreachable!())
});

/// 验证模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// 新建：缺失字段取默认值，无默认值且不可空时报错
    Create,
    /// 部分更新：只校验给出的字段，只读字段不可修改
    Partial,
}

/// 载荷验证能力
pub trait SchemaValidator: Send + Sync {
    /// 校验输入并返回转换后的值，失败时返回 `OrmError::ValidationErrors`
    fn validate(&self, fields: &[Field], input: &Row, mode: ValidationMode) -> OrmResult<Row>;
}

/// 基于字段声明的默认验证器
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSchemaValidator;

impl SchemaValidator for DefaultSchemaValidator {
    fn validate(&self, fields: &[Field], input: &Row, mode: ValidationMode) -> OrmResult<Row> {
        let mut errors = Vec::new();
        let mut output = Row::new();

        for key in input.keys() {
            if !fields.iter().any(|f| f.name == *key && f.is_column()) {
                errors.push(FieldError::new(key.clone(), "未知字段"));
            }
        }

        for field in fields.iter().filter(|f| f.is_column()) {
            match input.get(&field.name) {
                Some(value) => {
                    if mode == ValidationMode::Partial && field.read_only {
                        errors.push(FieldError::new(field.name.clone(), "只读字段不能修改"));
                        continue;
                    }
                    match field.clean(value.clone()) {
                        Ok(cleaned) => {
                            output.insert(field.name.clone(), cleaned);
                        }
                        Err(e) => errors.push(e),
                    }
                }
                None if mode == ValidationMode::Create => {
                    if let Some(default) = field.default_value() {
                        match field.clean(default) {
                            Ok(cleaned) => {
                                output.insert(field.name.clone(), cleaned);
                            }
                            Err(e) => errors.push(e),
                        }
                    } else if field.is_generated() {
                        // 由数据库生成
                    } else if field.null {
                        output.insert(field.name.clone(), DataValue::Null);
                    } else {
                        errors.push(FieldError::new(field.name.clone(), "字段必填"));
                    }
                }
                None => {}
            }
        }

        if errors.is_empty() {
            Ok(output)
        } else {
            Err(OrmError::ValidationErrors { errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{char_field, datetime_field, integer_field};

    fn fields() -> Vec<Field> {
        let mut id = Field::auto_id();
        id.name = "id".to_string();
        let mut name = char_field(10);
        name.name = "name".to_string();
        let mut age = integer_field().default(18);
        age.name = "age".to_string();
        let mut created = datetime_field().auto_now_add();
        created.name = "created".to_string();
        vec![id, name, age, created]
    }

    #[test]
    fn test_create_fills_defaults() {
        let mut input = Row::new();
        input.insert("name".to_string(), DataValue::from("Adam"));
        let out = DefaultSchemaValidator
            .validate(&fields(), &input, ValidationMode::Create)
            .unwrap();
        assert_eq!(out.get("age"), Some(&DataValue::Int(18)));
        assert!(matches!(out.get("created"), Some(DataValue::DateTime(_))));
        assert!(!out.contains_key("id"));
    }

    #[test]
    fn test_create_collects_all_errors() {
        let mut input = Row::new();
        input.insert("age".to_string(), DataValue::from("x"));
        input.insert("bogus".to_string(), DataValue::Int(1));
        let err = DefaultSchemaValidator
            .validate(&fields(), &input, ValidationMode::Create)
            .unwrap_err();
        match err {
            OrmError::ValidationErrors { errors } => {
                let names: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert!(names.contains(&"bogus"));
                assert!(names.contains(&"age"));
                assert!(names.contains(&"name"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_partial_rejects_read_only() {
        let mut input = Row::new();
        input.insert("id".to_string(), DataValue::Int(3));
        assert!(
            DefaultSchemaValidator
                .validate(&fields(), &input, ValidationMode::Partial)
                .is_err()
        );
    }
}
