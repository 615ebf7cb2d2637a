//! 关系预取
//!
//! 每个 `Prefetch` 沿关系路径逐跳批量查询（每跳一条语句），
//! 最终结果挂到顶层实例的目标属性上。带自定义查询集的叶子按每个所属实例单独执行

use super::queryset::QuerySet;
use crate::error::OrmResult;
use crate::model::{resolve_hop, Hop, ModelClass, ModelInstance, RelationCell};
use crate::types::DataValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// 预取声明
#[derive(Debug, Clone)]
pub struct Prefetch {
    /// 关系路径，`posts_set__comments_set`
    pub relation: String,
    /// 结果挂载的属性名，缺省为关系路径
    pub to_attr: Option<String>,
    /// 叶子关系使用的查询集
    pub queryset: Option<QuerySet>,
}

impl Prefetch {
    pub fn new(relation: &str) -> Self {
        Self {
            relation: relation.to_string(),
            to_attr: None,
            queryset: None,
        }
    }

    pub fn to_attr(mut self, name: &str) -> Self {
        self.to_attr = Some(name.to_string());
        self
    }

    pub fn queryset(mut self, queryset: QuerySet) -> Self {
        self.queryset = Some(queryset);
        self
    }

    /// 结果挂载的属性名
    pub fn attr_name(&self) -> &str {
        self.to_attr.as_deref().unwrap_or(&self.relation)
    }

    fn segments(&self) -> OrmResult<Vec<String>> {
        let segments: Vec<String> = self.relation.split("__").map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(crate::orm_error!(
                relationship,
                format!("无效的预取路径: '{}'", self.relation)
            ));
        }
        Ok(segments)
    }
}

impl From<&str> for Prefetch {
    fn from(relation: &str) -> Self {
        Prefetch::new(relation)
    }
}

impl From<String> for Prefetch {
    fn from(relation: String) -> Self {
        Prefetch::new(&relation)
    }
}

/// 执行任何查询之前检查预取声明
pub(crate) fn check_prefetches(model: &ModelClass, prefetches: &[Prefetch]) -> OrmResult<()> {
    let mut seen = HashSet::new();
    for prefetch in prefetches {
        prefetch.segments()?;
        if let Some(attr) = &prefetch.to_attr {
            if model.has_attribute(attr) {
                return Err(crate::orm_error!(
                    relationship,
                    format!("预取目标属性 '{}' 与模型 {} 的已有属性冲突", attr, model.name())
                ));
            }
        }
        if !seen.insert(prefetch.attr_name().to_string()) {
            return Err(crate::orm_error!(
                relationship,
                format!("预取目标属性 '{}' 重复", prefetch.attr_name())
            ));
        }
    }
    Ok(())
}

/// 一跳之后的结果：(顶层实例下标, 实例)
type Frontier = Vec<(usize, ModelInstance)>;

/// 对查询结果执行全部预取
pub(crate) async fn prefetch_related_objects(
    base: &QuerySet,
    instances: &mut [ModelInstance],
    prefetches: &[Prefetch],
) -> OrmResult<()> {
    if instances.is_empty() {
        return Ok(());
    }
    let registry = base.model().registry()?;

    for prefetch in prefetches {
        let segments = prefetch.segments()?;
        let mut current: Frontier = instances.iter().cloned().enumerate().collect();
        let mut model: Arc<ModelClass> = base.model().clone();
        let mut single_forward: Option<String> = None;

        for (depth, segment) in segments.iter().enumerate() {
            let hop = resolve_hop(&model, &registry, segment)?;
            let target = hop.target().clone();
            let leaf = depth + 1 == segments.len();
            if segments.len() == 1 {
                if let Hop::Forward { field, .. } = &hop {
                    single_forward = Some(field.clone());
                }
            }

            current = match (&prefetch.queryset, leaf) {
                (Some(queryset), true) => {
                    if queryset.model().name() != target.name() {
                        return Err(crate::orm_error!(
                            relationship,
                            format!(
                                "预取 '{}' 的查询集模型 {} 与关系目标 {} 不一致",
                                prefetch.relation,
                                queryset.model().name(),
                                target.name()
                            )
                        ));
                    }
                    fetch_per_owner(base, &hop, &current, &base.scoped_for(queryset)).await?
                }
                _ => fetch_batched(base, &hop, &current, &base.scoped_for(&target.query())).await?,
            };
            model = target;
        }

        let mut grouped: Vec<Vec<ModelInstance>> = vec![Vec::new(); instances.len()];
        let mut seen: Vec<HashSet<String>> = vec![HashSet::new(); instances.len()];
        for (index, item) in current {
            if seen[index].insert(item.pk().group_key()) {
                grouped[index].push(item);
            }
        }
        for (instance, items) in instances.iter_mut().zip(grouped) {
            if let Some(field) = &single_forward {
                let cell = RelationCell::Loaded(items.first().cloned().map(Box::new));
                instance.set_relation(field, cell);
            }
            instance.set_prefetched(prefetch.attr_name(), items);
        }
    }
    Ok(())
}

fn distinct_keys<'a>(values: impl Iterator<Item = &'a DataValue>) -> Vec<DataValue> {
    let mut seen = HashSet::new();
    values
        .filter(|v| !v.is_null() && seen.insert(v.group_key()))
        .cloned()
        .collect()
}

/// 整跳一次查询
async fn fetch_batched(
    base: &QuerySet,
    hop: &Hop,
    current: &Frontier,
    queryset: &QuerySet,
) -> OrmResult<Frontier> {
    let mut next = Frontier::new();
    match hop {
        Hop::Forward { field, .. } => {
            let values: Vec<DataValue> = current.iter().map(|(_, i)| i.value(field)).collect();
            let keys = distinct_keys(values.iter());
            if keys.is_empty() {
                return Ok(next);
            }
            let fetched = queryset
                .filter([("pk__in", DataValue::Array(keys))])
                .fetch_instances()
                .await?;
            let by_pk: HashMap<String, ModelInstance> =
                fetched.into_iter().map(|i| (i.pk().group_key(), i)).collect();
            for (index, owner) in current {
                if let Some(target) = by_pk.get(&owner.value(field).group_key()) {
                    next.push((*index, target.clone()));
                }
            }
        }
        Hop::Reverse { field, .. } => {
            let pks: Vec<DataValue> = current.iter().map(|(_, i)| i.pk()).collect();
            let keys = distinct_keys(pks.iter());
            if keys.is_empty() {
                return Ok(next);
            }
            let fetched = queryset
                .filter([(format!("{}__in", field), DataValue::Array(keys))])
                .fetch_instances()
                .await?;
            let mut children: HashMap<String, Vec<ModelInstance>> = HashMap::new();
            for child in fetched {
                children
                    .entry(child.value(field).group_key())
                    .or_default()
                    .push(child);
            }
            for (index, owner) in current {
                if let Some(items) = children.get(&owner.pk().group_key()) {
                    next.extend(items.iter().map(|c| (*index, c.clone())));
                }
            }
        }
        Hop::ManyToMany {
            through,
            near_column,
            far_column,
            ..
        } => {
            let pks: Vec<DataValue> = current.iter().map(|(_, i)| i.pk()).collect();
            let keys = distinct_keys(pks.iter());
            if keys.is_empty() {
                return Ok(next);
            }
            let links = base
                .scoped_for(&through.query())
                .filter([(format!("{}__in", near_column), DataValue::Array(keys))])
                .values([near_column.as_str(), far_column.as_str()])
                .await?;
            let mut far_by_near: HashMap<String, HashSet<String>> = HashMap::new();
            let mut far_values = Vec::new();
            for link in &links {
                let near = link.get(near_column).cloned().unwrap_or(DataValue::Null);
                let far = link.get(far_column).cloned().unwrap_or(DataValue::Null);
                far_by_near
                    .entry(near.group_key())
                    .or_default()
                    .insert(far.group_key());
                far_values.push(far);
            }
            let far_keys = distinct_keys(far_values.iter());
            if far_keys.is_empty() {
                return Ok(next);
            }
            let targets = queryset
                .filter([("pk__in", DataValue::Array(far_keys))])
                .fetch_instances()
                .await?;
            for (index, owner) in current {
                if let Some(fars) = far_by_near.get(&owner.pk().group_key()) {
                    next.extend(
                        targets
                            .iter()
                            .filter(|t| fars.contains(&t.pk().group_key()))
                            .map(|t| (*index, t.clone())),
                    );
                }
            }
        }
    }
    Ok(next)
}

/// 自定义查询集按每个所属实例执行，保留其排序与分页语义
async fn fetch_per_owner(
    base: &QuerySet,
    hop: &Hop,
    current: &Frontier,
    queryset: &QuerySet,
) -> OrmResult<Frontier> {
    let mut next = Frontier::new();
    for (index, owner) in current {
        let scoped = match hop {
            Hop::Forward { field, .. } => {
                let value = owner.value(field);
                if value.is_null() {
                    continue;
                }
                queryset.filter([("pk", value)])
            }
            Hop::Reverse { field, .. } => queryset.filter([(field.clone(), owner.pk())]),
            Hop::ManyToMany {
                through,
                near_column,
                far_column,
                ..
            } => {
                let fars = base
                    .scoped_for(&through.query())
                    .filter([(near_column.clone(), owner.pk())])
                    .values_list([far_column.as_str()], true)
                    .await?;
                queryset.filter([("pk__in", DataValue::Array(fars))])
            }
        };
        let items = scoped.fetch_instances().await?;
        next.extend(items.into_iter().map(|i| (*index, i)));
    }
    Ok(next)
}
