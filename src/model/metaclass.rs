//! 模型注册与关系装配
//!
//! 先完成全部冲突检查，再一次性提交：注册模型、安装反向关联、生成多对多中间模型

use super::builder::ModelBuilder;
use super::class::ModelClass;
use super::meta::{default_related_name, MetaInfo};
use super::relation::{RelatedField, RelatedKind, ThroughInfo};
use crate::error::OrmResult;
use crate::fields::{foreign_key, FieldType, ModelRef};
use crate::registry::{PendingRelation, Registry};
use rat_logger::{debug, info};
use std::sync::Arc;

/// 一条待安装的反向关联
struct PlannedRelation {
    target: String,
    related: RelatedField,
}

/// 反向关联名在目标模型上是否可用
fn check_collision(
    target_name: &str,
    target: Option<&ModelClass>,
    planned: &[PlannedRelation],
    related_name: &str,
) -> OrmResult<()> {
    let taken_on_target = target.map(|t| t.has_attribute(related_name)).unwrap_or(false);
    let taken_in_plan = planned
        .iter()
        .any(|p| p.target == target_name && p.related.name == related_name);
    if taken_on_target || taken_in_plan {
        return Err(crate::orm_error!(
            config,
            format!(
                "模型 {} 上的关联名 '{}' 已存在，请为关系字段指定不同的 related_name",
                target_name, related_name
            )
        ));
    }
    Ok(())
}

fn relation_of(source: &str, field_name: &str, field_type: &FieldType) -> Option<(ModelRef, RelatedField)> {
    match field_type {
        FieldType::ForeignKey(info) => Some((
            info.target.clone(),
            RelatedField {
                name: info
                    .related_name
                    .clone()
                    .unwrap_or_else(|| default_related_name(source)),
                source_model: source.to_string(),
                source_field: field_name.to_string(),
                kind: if info.one_to_one {
                    RelatedKind::OneToOne
                } else {
                    RelatedKind::ForeignKey
                },
            },
        )),
        FieldType::ManyToMany(info) => Some((
            info.target.clone(),
            RelatedField {
                name: info
                    .related_name
                    .clone()
                    .unwrap_or_else(|| default_related_name(source)),
                source_model: source.to_string(),
                source_field: field_name.to_string(),
                kind: RelatedKind::ManyToMany,
            },
        )),
        _ => None,
    }
}

/// 注册模型并装配关系
pub(crate) fn register(registry: &Arc<Registry>, class: ModelClass) -> OrmResult<Arc<ModelClass>> {
    let name = class.name.clone();
    if registry.contains_model(&name) {
        return Err(crate::orm_error!(
            config,
            format!("模型 {} 已在注册表中注册", name)
        ));
    }

    // 本模型的关系字段
    let mut planned: Vec<PlannedRelation> = Vec::new();
    let mut deferred: Vec<PendingRelation> = Vec::new();
    for field in class.meta.fields.iter() {
        let Some((target_ref, related)) = relation_of(&name, &field.name, &field.field_type) else {
            continue;
        };
        let target_name = target_ref.name().to_string();
        if let ModelRef::Class(target) = &target_ref {
            if !registry.contains_model(target.name()) && target.name() != name {
                return Err(crate::orm_error!(
                    config,
                    format!("关系字段 {}.{} 的目标模型 {} 不属于同一注册表", name, field.name, target.name())
                ));
            }
        }

        if target_name == name {
            if class.meta.field(&related.name).is_some() {
                return Err(crate::orm_error!(
                    config,
                    format!("模型 {} 上的关联名 '{}' 与字段冲突", name, related.name)
                ));
            }
            check_collision(&name, None, &planned, &related.name)?;
        } else if let Ok(target) = registry.get_model(&target_name) {
            check_collision(&target_name, Some(&target), &planned, &related.name)?;
        } else {
            deferred.push(PendingRelation {
                target: target_name.clone(),
                source: name.clone(),
                field: field.name.clone(),
            });
            continue;
        }

        if related.kind == RelatedKind::ManyToMany {
            if let FieldType::ManyToMany(info) = &field.field_type {
                if info.through.is_none() {
                    let through_name = format!("{}{}", name, target_name);
                    if registry.contains_model(&through_name) {
                        return Err(crate::orm_error!(
                            config,
                            format!("多对多中间模型 {} 已存在，请显式指定 through", through_name)
                        ));
                    }
                }
            }
        }
        planned.push(PlannedRelation {
            target: target_name,
            related,
        });
    }

    // 其他模型先前指向本模型的关系
    let pending = registry.pending_for(&name);
    let mut resolved_pending: Vec<PlannedRelation> = Vec::new();
    for item in &pending {
        let source = registry.get_model(&item.source)?;
        let Some(field) = source.field(&item.field) else {
            continue;
        };
        let Some((_, related)) = relation_of(&item.source, &field.name, &field.field_type) else {
            continue;
        };
        if class.meta.field(&related.name).is_some() {
            return Err(crate::orm_error!(
                config,
                format!("模型 {} 上的关联名 '{}' 与字段冲突", name, related.name)
            ));
        }
        check_collision(&name, None, &planned, &related.name)?;
        check_collision(&name, None, &resolved_pending, &related.name)?;
        resolved_pending.push(PlannedRelation {
            target: name.clone(),
            related,
        });
    }

    // 提交
    let proxy = build_proxy(&class.meta, &name, &class.managers);
    let _ = class.proxy.set(Arc::new(proxy));
    let class = Arc::new(class);
    registry.insert_model(class.clone());
    info!(
        "模型已注册: {} (表: {})",
        name,
        class.meta.table_name.as_deref().unwrap_or("-")
    );

    for plan in planned.into_iter().chain(resolved_pending) {
        install_related(registry, &class, plan)?;
    }
    for item in deferred {
        debug!("关系目标 {} 尚未注册，延迟装配 {}.{}", item.target, item.source, item.field);
        registry.add_pending(item);
    }
    registry.remove_pending(&name);

    Ok(class)
}

fn install_related(
    registry: &Arc<Registry>,
    class: &Arc<ModelClass>,
    plan: PlannedRelation,
) -> OrmResult<()> {
    let target = if plan.target == class.name {
        class.clone()
    } else {
        registry.get_model(&plan.target)?
    };
    debug!(
        "安装反向关联: {}.{} -> {}.{}",
        plan.related.source_model, plan.related.source_field, target.name, plan.related.name
    );
    let related = plan.related.clone();
    target.related.write().push(plan.related);

    if related.kind == RelatedKind::ManyToMany {
        let owner = registry.get_model(&related.source_model)?;
        attach_through(registry, &owner, &related.source_field, &target, &related.name)?;
    }
    Ok(())
}

/// 为多对多字段绑定中间模型（显式指定或自动生成）
fn attach_through(
    registry: &Arc<Registry>,
    owner: &Arc<ModelClass>,
    field_name: &str,
    target: &Arc<ModelClass>,
    related_name: &str,
) -> OrmResult<()> {
    let explicit = owner
        .field(field_name)
        .and_then(|f| f.many_to_many_info())
        .and_then(|info| info.through.clone());

    let info = match explicit {
        Some(through_ref) => {
            let through = registry.resolve(&through_ref)?;
            let fk_columns: Vec<(String, String)> = through
                .fields()
                .iter()
                .filter_map(|f| {
                    f.foreign_key_info()
                        .map(|info| (f.name.clone(), info.target.name().to_string()))
                })
                .collect();
            let owner_column = fk_columns
                .iter()
                .find(|(_, t)| t == owner.name())
                .map(|(c, _)| c.clone());
            let target_column = fk_columns
                .iter()
                .filter(|(c, _)| Some(c) != owner_column.as_ref())
                .find(|(_, t)| t == target.name())
                .map(|(c, _)| c.clone());
            match (owner_column, target_column) {
                (Some(owner_column), Some(target_column)) => ThroughInfo {
                    model: through.name().to_string(),
                    owner_column,
                    target_column,
                    target: target.name().to_string(),
                    related_name: related_name.to_string(),
                },
                _ => {
                    return Err(crate::orm_error!(
                        config,
                        format!(
                            "中间模型 {} 必须包含指向 {} 和 {} 的外键",
                            through.name(),
                            owner.name(),
                            target.name()
                        )
                    ));
                }
            }
        }
        None => {
            let through_name = format!("{}{}", owner.name(), target.name());
            let owner_column = owner.name().to_lowercase();
            let mut target_column = target.name().to_lowercase();
            if target_column == owner_column {
                target_column = format!("{}_related", target_column);
            }
            let through_lower = through_name.to_lowercase();
            let target_related = if Arc::ptr_eq(owner, target) {
                format!("{}s_target_set", through_lower)
            } else {
                format!("{}s_set", through_lower)
            };

            let mut builder = ModelBuilder::new(&through_name)
                .registry(registry)
                .table_name(&format!("{}_{}", owner.table_name()?, target.table_name()?))
                .field(
                    &owner_column,
                    foreign_key(owner).related_name(&format!("{}s_set", through_lower)),
                )
                .field(&target_column, foreign_key(target).related_name(&target_related))
                .unique_together([owner_column.as_str(), target_column.as_str()]);
            if owner.meta.is_tenant || target.meta.is_tenant {
                builder = builder.tenant();
            }
            builder.build()?;
            debug!("自动生成多对多中间模型: {}", through_name);

            ThroughInfo {
                model: through_name,
                owner_column,
                target_column,
                target: target.name().to_string(),
                related_name: related_name.to_string(),
            }
        }
    };

    owner.through.write().insert(field_name.to_string(), info);
    Ok(())
}

/// 代理模型：非主键字段全部放宽为可空
fn build_proxy(
    meta: &MetaInfo,
    name: &str,
    managers: &[(String, Arc<dyn crate::query::Manager>)],
) -> ModelClass {
    let mut proxy_meta = meta.clone();
    proxy_meta.proxy_for = Some(name.to_string());
    for field in proxy_meta.fields.iter_mut() {
        if !field.primary_key {
            field.null = true;
        }
    }
    ModelClass::new(name.to_string(), proxy_meta, managers.to_vec())
}
