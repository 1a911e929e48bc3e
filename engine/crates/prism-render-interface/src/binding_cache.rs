use std::collections::HashMap;

/// 拥有 descriptor set 的对象的稳定编号
///
/// pass、材质等在创建时分配，生命周期内不变
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub u32);

/// OwnerId 分配器，单调递增，不回收
#[derive(Default)]
pub struct OwnerIdAllocator {
    next: u32,
}
impl OwnerIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn alloc(&mut self) -> OwnerId {
        let id = OwnerId(self.next);
        self.next += 1;
        id
    }
}

/// 缓存的 key：(owner, frame slot 或 present image slot, set index)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub owner: OwnerId,
    pub slot: usize,
    pub set_index: u32,
}
impl BindingKey {
    #[inline]
    pub const fn new(owner: OwnerId, slot: usize, set_index: u32) -> Self {
        Self { owner, slot, set_index }
    }
}

/// descriptor set 的缓存
///
/// set 从 bump 分配的 pool 中分配，不会单独释放，所以缓存没有淘汰策略；
/// pool reset 或者 resize 时整体失效。
pub struct BindingCache<S: Copy> {
    bindings: HashMap<BindingKey, S>,
    hits: u64,
    misses: u64,
}
impl<S: Copy> Default for BindingCache<S> {
    fn default() -> Self {
        Self {
            bindings: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }
}
impl<S: Copy> BindingCache<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 命中时直接返回；未命中时调用 `create` 分配并写入 set
    pub fn get_or_try_insert_with<E>(&mut self, key: BindingKey, create: impl FnOnce() -> Result<S, E>) -> Result<S, E> {
        if let Some(set) = self.bindings.get(&key) {
            self.hits += 1;
            return Ok(*set);
        }
        self.misses += 1;
        let set = create()?;
        self.bindings.insert(key, set);
        Ok(set)
    }

    #[inline]
    pub fn get(&self, key: &BindingKey) -> Option<S> {
        self.bindings.get(key).copied()
    }

    /// 使某个 owner 的所有 binding 失效，例如 owner 引用的资源被重建
    pub fn invalidate_owner(&mut self, owner: OwnerId) {
        self.bindings.retain(|key, _| key.owner != owner);
    }

    /// 全部失效，在 descriptor pool reset 时调用
    pub fn invalidate_all(&mut self) {
        log::debug!("binding cache invalidated, {} bindings dropped", self.bindings.len());
        self.bindings.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// (hits, misses)
    #[inline]
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_lookup_hits_cache() {
        let mut cache = BindingCache::<u32>::new();
        let key = BindingKey::new(OwnerId(3), 0, 1);
        let mut created = 0;

        for _ in 0..3 {
            let set = cache
                .get_or_try_insert_with::<()>(key, || {
                    created += 1;
                    Ok(42)
                })
                .unwrap();
            assert_eq!(set, 42);
        }
        assert_eq!(created, 1);
        assert_eq!(cache.stats(), (2, 1));
    }

    #[test]
    fn test_slots_and_sets_are_distinct_keys() {
        let mut cache = BindingCache::<u32>::new();
        let owner = OwnerId(0);
        cache.get_or_try_insert_with::<()>(BindingKey::new(owner, 0, 0), || Ok(1)).unwrap();
        cache.get_or_try_insert_with::<()>(BindingKey::new(owner, 1, 0), || Ok(2)).unwrap();
        cache.get_or_try_insert_with::<()>(BindingKey::new(owner, 0, 1), || Ok(3)).unwrap();
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&BindingKey::new(owner, 1, 0)), Some(2));
    }

    #[test]
    fn test_invalidate_owner_keeps_others() {
        let mut cache = BindingCache::<u32>::new();
        let mut ids = OwnerIdAllocator::new();
        let a = ids.alloc();
        let b = ids.alloc();
        assert_ne!(a, b);

        cache.get_or_try_insert_with::<()>(BindingKey::new(a, 0, 0), || Ok(1)).unwrap();
        cache.get_or_try_insert_with::<()>(BindingKey::new(b, 0, 0), || Ok(2)).unwrap();
        cache.invalidate_owner(a);
        assert_eq!(cache.get(&BindingKey::new(a, 0, 0)), None);
        assert_eq!(cache.get(&BindingKey::new(b, 0, 0)), Some(2));

        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_creation_is_not_cached() {
        let mut cache = BindingCache::<u32>::new();
        let key = BindingKey::new(OwnerId(1), 0, 0);
        assert!(cache.get_or_try_insert_with(key, || Err("pool exhausted")).is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_try_insert_with::<&str>(key, || Ok(7)), Ok(7));
    }
}
