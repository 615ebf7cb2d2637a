use serde::{Deserialize, Serialize};

/// 支持的数据库类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseType {
    /// SQLite 数据库
    SQLite,
    /// PostgreSQL 数据库
    PostgreSQL,
}

impl DatabaseType {
    /// 获取数据库类型的字符串表示
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::SQLite => "sqlite",
            DatabaseType::PostgreSQL => "postgresql",
        }
    }

    /// 从字符串解析数据库类型
    pub fn parse(s: &str) -> Result<Self, crate::error::OrmError> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(DatabaseType::SQLite),
            "postgresql" | "postgres" | "pg" => Ok(DatabaseType::PostgreSQL),
            _ => Err(crate::orm_error!(unsupported_db, s)),
        }
    }

    /// 该数据库的默认 schema 名
    pub fn default_schema(&self) -> &'static str {
        match self {
            DatabaseType::SQLite => "main",
            DatabaseType::PostgreSQL => "public",
        }
    }
}

/// 数据库连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库类型
    pub db_type: DatabaseType,
    /// 连接配置
    pub connection: ConnectionConfig,
    /// 数据库别名（默认为 "default"）
    pub alias: String,
}

/// 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionConfig {
    /// SQLite 文件路径，":memory:" 表示内存数据库
    SQLite {
        /// 数据库文件路径
        path: String,
        /// 是否创建数据库文件（如果不存在）
        create_if_missing: bool,
    },
    /// PostgreSQL 连接配置
    PostgreSQL {
        /// 主机地址
        host: String,
        /// 端口号
        port: u16,
        /// 数据库名
        database: String,
        /// 用户名
        username: String,
        /// 密码
        password: String,
        /// SSL 模式 (disable, allow, prefer, require, verify-ca, verify-full)
        ssl_mode: Option<String>,
    },
}

impl ConnectionConfig {
    /// 连接配置对应的数据库类型
    pub fn database_type(&self) -> DatabaseType {
        match self {
            ConnectionConfig::SQLite { .. } => DatabaseType::SQLite,
            ConnectionConfig::PostgreSQL { .. } => DatabaseType::PostgreSQL,
        }
    }

    /// 生成连接URL
    pub fn to_url(&self) -> String {
        match self {
            ConnectionConfig::SQLite { path, .. } => {
                if path == ":memory:" {
                    "sqlite::memory:".to_string()
                } else {
                    format!("sqlite://{}", path)
                }
            }
            ConnectionConfig::PostgreSQL {
                host,
                port,
                database,
                username,
                password,
                ssl_mode,
            } => {
                let mut url = format!(
                    "postgres://{}:{}@{}:{}/{}",
                    username, password, host, port, database
                );
                if let Some(mode) = ssl_mode {
                    url.push_str(&format!("?sslmode={}", mode));
                }
                url
            }
        }
    }
}

impl DatabaseConfig {
    /// 校验配置与类型是否一致
    pub fn validate(&self) -> Result<(), crate::error::OrmError> {
        if self.alias.trim().is_empty() {
            return Err(crate::orm_error!(config, "数据库别名不能为空"));
        }
        if self.connection.database_type() != self.db_type {
            return Err(crate::orm_error!(
                config,
                format!(
                    "数据库类型 {} 与连接配置不匹配",
                    self.db_type.as_str()
                )
            ));
        }
        if let ConnectionConfig::SQLite { path, .. } = &self.connection {
            if path.trim().is_empty() {
                return Err(crate::orm_error!(config, "SQLite 路径不能为空"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_database_type() {
        assert_eq!(DatabaseType::parse("pg").unwrap(), DatabaseType::PostgreSQL);
        assert_eq!(DatabaseType::parse("SQLite").unwrap(), DatabaseType::SQLite);
        assert!(DatabaseType::parse("oracle").is_err());
    }

    #[test]
    fn test_connection_url() {
        let conn = ConnectionConfig::SQLite {
            path: ":memory:".to_string(),
            create_if_missing: true,
        };
        assert_eq!(conn.to_url(), "sqlite::memory:");

        let conn = ConnectionConfig::PostgreSQL {
            host: "localhost".to_string(),
            port: 5432,
            database: "app".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            ssl_mode: Some("disable".to_string()),
        };
        assert_eq!(conn.to_url(), "postgres://u:p@localhost:5432/app?sslmode=disable");
    }
}
