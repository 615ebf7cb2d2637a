//! 多语言错误消息模块
//!
//! 使用rat_embed_lang框架提供统一的错误消息多语言支持

use rat_embed_lang::register_translations;
use std::collections::HashMap;

/// 错误消息翻译注册器
pub struct ErrorMessageI18n;

type Catalogue = HashMap<String, HashMap<String, String>>;

fn insert(translations: &mut Catalogue, key: &str, zh: &str, en: &str, ja: &str) {
    let mut entry = HashMap::new();
    entry.insert("zh-CN".to_string(), zh.to_string());
    entry.insert("en-US".to_string(), en.to_string());
    entry.insert("ja-JP".to_string(), ja.to_string());
    translations.insert(key.to_string(), entry);
}

impl ErrorMessageI18n {
    /// 注册所有错误消息翻译
    pub fn register_all_translations() {
        let mut translations = HashMap::new();

        // 模型配置错误
        insert(
            &mut translations,
            "error.config",
            "配置错误: {message}",
            "Configuration error: {message}",
            "設定エラー: {message}",
        );

        // 查找错误
        insert(
            &mut translations,
            "error.not_found",
            "未找到对象: {model} - {message}",
            "Object not found: {model} - {message}",
            "オブジェクトが見つかりません: {model} - {message}",
        );
        insert(
            &mut translations,
            "error.multiple_objects",
            "返回了多个对象: {model} - {message}",
            "Multiple objects returned: {model} - {message}",
            "複数のオブジェクトが返されました: {model} - {message}",
        );

        // 验证错误
        insert(
            &mut translations,
            "error.validation",
            "模型验证失败: {field} - {message}",
            "Model validation failed: {field} - {message}",
            "モデル検証が失敗しました: {field} - {message}",
        );
        insert(
            &mut translations,
            "error.validation_errors",
            "数据验证失败: {message}",
            "Data validation failed: {message}",
            "データ検証が失敗しました: {message}",
        );

        insert(
            &mut translations,
            "error.relationship",
            "关系错误: {message}",
            "Relationship error: {message}",
            "リレーションエラー: {message}",
        );
        insert(
            &mut translations,
            "error.tenant",
            "租户错误: {message}",
            "Tenant error: {message}",
            "テナントエラー: {message}",
        );

        // 数据库错误
        insert(
            &mut translations,
            "error.query",
            "查询执行失败: {message}",
            "Query execution failed: {message}",
            "クエリ実行が失敗しました: {message}",
        );
        insert(
            &mut translations,
            "error.connection",
            "数据库连接失败: {message}",
            "Database connection failed: {message}",
            "データベース接続に失敗しました: {message}",
        );
        insert(
            &mut translations,
            "error.alias_not_found",
            "数据库别名 '{alias}' 未找到",
            "Database alias '{alias}' not found",
            "データベースエイリアス '{alias}' が見つかりません",
        );
        insert(
            &mut translations,
            "error.model_not_registered",
            "模型 '{name}' 未在注册表中注册",
            "Model '{name}' is not registered",
            "モデル '{name}' は登録されていません",
        );
        insert(
            &mut translations,
            "error.serialization",
            "数据序列化失败: {message}",
            "Data serialization failed: {message}",
            "データシリアライズが失敗しました: {message}",
        );
        insert(
            &mut translations,
            "error.unsupported_database",
            "不支持的数据库类型: {db_type}",
            "Unsupported database type: {db_type}",
            "サポートされていないデータベースタイプ: {db_type}",
        );

        register_translations(translations);
    }

    /// 初始化错误消息多语言支持
    pub fn init() {
        Self::register_all_translations();

        // 从环境变量获取语言设置，默认为zh-CN
        let lang = std::env::var("RAT_LANG")
            .or_else(|_| std::env::var("LANG"))
            .unwrap_or_else(|_| "zh-CN".to_string());

        use rat_embed_lang::normalize_language_code;
        let normalized_lang = normalize_language_code(&lang);
        set_language(&normalized_lang);
    }
}

/// 重新导出rat_embed_lang的核心函数
pub use rat_embed_lang::{current_language, set_language, t, tf};
