//! 关系描述与解析
//!
//! 正向外键、反向关联、多对多在查询路径中统一解析为 `Hop`

use super::{ModelClass, ModelInstance};
use crate::error::OrmResult;
use crate::query::QuerySet;
use crate::registry::Registry;
use crate::types::DataValue;
use std::sync::Arc;

/// 反向关联的来源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelatedKind {
    ForeignKey,
    OneToOne,
    ManyToMany,
}

/// 安装在目标模型上的反向关联描述
#[derive(Debug, Clone)]
pub struct RelatedField {
    /// 目标模型上的关联名
    pub name: String,
    /// 持有外键（或多对多字段）的模型
    pub source_model: String,
    /// 来源模型上的字段名
    pub source_field: String,
    pub kind: RelatedKind,
}

/// 多对多字段的中间模型信息
#[derive(Debug, Clone)]
pub struct ThroughInfo {
    /// 中间模型名
    pub model: String,
    /// 指向字段所属模型的外键列
    pub owner_column: String,
    /// 指向目标模型的外键列
    pub target_column: String,
    /// 目标模型名
    pub target: String,
    /// 目标模型上的反向关联名
    pub related_name: String,
}

/// 关系路径中的一跳
#[derive(Clone)]
pub enum Hop {
    /// 当前模型的外键列 = 目标主键
    Forward {
        field: String,
        target: Arc<ModelClass>,
    },
    /// 来源模型的外键列 = 当前主键
    Reverse {
        source: Arc<ModelClass>,
        field: String,
        one_to_one: bool,
    },
    /// 经由中间表：中间表.near = 当前主键，中间表.far = 目标主键
    ManyToMany {
        through: Arc<ModelClass>,
        near_column: String,
        far_column: String,
        target: Arc<ModelClass>,
    },
}

impl Hop {
    /// 这一跳到达的模型
    pub fn target(&self) -> &Arc<ModelClass> {
        match self {
            Hop::Forward { target, .. } => target,
            Hop::Reverse { source, .. } => source,
            Hop::ManyToMany { target, .. } => target,
        }
    }

    /// 一行是否可能对应多行
    pub fn is_many(&self) -> bool {
        match self {
            Hop::Forward { .. } => false,
            Hop::Reverse { one_to_one, .. } => !one_to_one,
            Hop::ManyToMany { .. } => true,
        }
    }
}

/// 把关系名解析为一跳
pub fn resolve_hop(model: &ModelClass, registry: &Registry, segment: &str) -> OrmResult<Hop> {
    if let Some(field) = model.field(segment) {
        if let Some(info) = field.foreign_key_info() {
            return Ok(Hop::Forward {
                field: field.name.clone(),
                target: registry.resolve(&info.target)?,
            });
        }
        if field.is_many_to_many() {
            let through = model.through_info(segment).ok_or_else(|| {
                crate::orm_error!(
                    relationship,
                    format!("多对多字段 {}.{} 的目标模型尚未注册", model.name(), segment)
                )
            })?;
            return Ok(Hop::ManyToMany {
                through: registry.get_model(&through.model)?,
                near_column: through.owner_column,
                far_column: through.target_column,
                target: registry.get_model(&through.target)?,
            });
        }
        return Err(crate::orm_error!(
            query,
            format!("字段 {}.{} 不是关系字段", model.name(), segment)
        ));
    }

    if let Some(related) = model.related_field(segment) {
        let source = registry.get_model(&related.source_model)?;
        return match related.kind {
            RelatedKind::ForeignKey | RelatedKind::OneToOne => Ok(Hop::Reverse {
                source,
                field: related.source_field,
                one_to_one: related.kind == RelatedKind::OneToOne,
            }),
            RelatedKind::ManyToMany => {
                let through = source.through_info(&related.source_field).ok_or_else(|| {
                    crate::orm_error!(
                        relationship,
                        format!("多对多关联 {} 缺少中间模型", segment)
                    )
                })?;
                Ok(Hop::ManyToMany {
                    through: registry.get_model(&through.model)?,
                    near_column: through.target_column,
                    far_column: through.owner_column,
                    target: source,
                })
            }
        };
    }

    Err(crate::orm_error!(
        query,
        format!("模型 {} 上不存在关系 '{}'", model.name(), segment)
    ))
}

/// 惰性关系单元：未加载 / 已加载
#[derive(Clone, Debug, Default)]
pub enum RelationCell {
    #[default]
    Unloaded,
    Loaded(Option<Box<ModelInstance>>),
}

impl RelationCell {
    pub fn is_loaded(&self) -> bool {
        matches!(self, RelationCell::Loaded(_))
    }
}

/// 多对多关系访问器
pub struct ManyToManyManager {
    owner_pk: DataValue,
    through: Arc<ModelClass>,
    near_column: String,
    far_column: String,
    target: Arc<ModelClass>,
    /// 从目标模型回到拥有者的关系名
    back_path: String,
    schema: Option<String>,
    database: Option<String>,
}

impl ManyToManyManager {
    pub(crate) fn new(
        owner: &ModelInstance,
        hop: Hop,
        back_path: String,
    ) -> OrmResult<Self> {
        let owner_pk = owner.pk();
        if owner_pk.is_null() {
            return Err(crate::orm_error!(
                relationship,
                format!("{} 实例尚未保存，不能访问多对多关系", owner.class().name())
            ));
        }
        match hop {
            Hop::ManyToMany {
                through,
                near_column,
                far_column,
                target,
            } => Ok(Self {
                owner_pk,
                through,
                near_column,
                far_column,
                target,
                back_path,
                schema: owner.schema().map(str::to_string),
                database: owner.database().map(str::to_string),
            }),
            _ => Err(crate::orm_error!(relationship, "不是多对多关系")),
        }
    }

    fn scoped(&self, qs: QuerySet) -> QuerySet {
        let qs = match &self.schema {
            Some(schema) => qs.using_schema(schema),
            None => qs,
        };
        match &self.database {
            Some(alias) => qs.using(alias),
            None => qs,
        }
    }

    /// 关联目标的查询集
    pub fn queryset(&self) -> QuerySet {
        let key = format!("{}__pk", self.back_path);
        self.scoped(self.target.query())
            .filter([(key, self.owner_pk.clone())])
    }

    pub async fn all(&self) -> OrmResult<Vec<ModelInstance>> {
        self.queryset().all().await
    }

    pub async fn count(&self) -> OrmResult<u64> {
        self.queryset().count().await
    }

    /// 建立关联，已存在时不重复插入
    pub async fn add(&self, target: &ModelInstance) -> OrmResult<()> {
        let target_pk = target.pk();
        if target_pk.is_null() {
            return Err(crate::orm_error!(relationship, "关联目标尚未保存"));
        }
        let link = self.scoped(self.through.query()).filter([
            (self.near_column.clone(), self.owner_pk.clone()),
            (self.far_column.clone(), target_pk.clone()),
        ]);
        if link.exists().await? {
            return Ok(());
        }
        self.scoped(self.through.query())
            .create([
                (self.near_column.clone(), self.owner_pk.clone()),
                (self.far_column.clone(), target_pk),
            ])
            .await?;
        Ok(())
    }

    /// 解除关联
    pub async fn remove(&self, target: &ModelInstance) -> OrmResult<u64> {
        self.scoped(self.through.query())
            .filter([
                (self.near_column.clone(), self.owner_pk.clone()),
                (self.far_column.clone(), target.pk()),
            ])
            .delete()
            .await
    }

    /// 清空全部关联
    pub async fn clear(&self) -> OrmResult<u64> {
        self.scoped(self.through.query())
            .filter([(self.near_column.clone(), self.owner_pk.clone())])
            .delete()
            .await
    }
}
