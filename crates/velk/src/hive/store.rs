//! Hive store: lazily-created object hives keyed by element class UID.

use std::fmt;
use std::sync::Mutex;

use crate::interface::{interface_ptr_cast, Interface, InterfaceEntry, InterfaceId};
use crate::memory::SharedPtr;
use crate::object::{make_object, ObjectClass, ObjectCore};
use crate::util::lock;
use crate::{ClassInfo, Uid};

use super::ObjectHive;

/// Keeps one object hive per element class, created on first request.
pub trait HiveStore: Interface {
    /// The hive for `element`, created (and initialised) on first access.
    /// Returns `None` when the element class is not registered.
    fn get_hive(&self, element: Uid) -> Option<SharedPtr<dyn ObjectHive>>;

    /// The existing hive for `element`, without creating one.
    fn find_hive(&self, element: Uid) -> Option<SharedPtr<dyn ObjectHive>>;

    /// Number of hives created so far.
    fn hive_count(&self) -> usize;

    /// Visits every hive; the visitor returns `false` to stop.
    fn for_each_hive(&self, visitor: &mut dyn FnMut(Uid, &SharedPtr<dyn ObjectHive>) -> bool);
}

impl InterfaceId for dyn HiveStore {
    const UID: Uid = Uid::parse("2e1f7e5a-56dd-4e1c-9c4f-5e41b2b9b0cd");
    const NAME: &'static str = "IHiveStore";
}

/// Default [`HiveStore`] implementation; a sorted `Uid -> hive` table.
pub struct HiveStoreImpl {
    core: ObjectCore,
    hives: Mutex<Vec<(Uid, SharedPtr<dyn ObjectHive>)>>,
}

impl HiveStoreImpl {
    /// Class UID of the hive store.
    pub const CLASS_UID: Uid = Uid::parse("886c9b65-f629-4dbe-8a9f-5eab7295d4f7");

    pub(crate) fn new() -> Self {
        Self {
            core: ObjectCore::new(),
            hives: Mutex::new(Vec::new()),
        }
    }

    /// Creates an empty hive store.
    pub fn create() -> SharedPtr<dyn HiveStore> {
        let obj = make_object(Self::new());
        interface_ptr_cast::<dyn HiveStore, _>(&obj).expect("HiveStoreImpl implements HiveStore")
    }

    fn class_info_impl() -> &'static ClassInfo {
        static INFO: std::sync::LazyLock<ClassInfo> = std::sync::LazyLock::new(|| {
            ClassInfo::new(
                HiveStoreImpl::CLASS_UID,
                "HiveStore",
                vec![InterfaceEntry::with_caster::<dyn HiveStore>(
                    <dyn HiveStore as InterfaceId>::INFO,
                    |o| {
                        o.as_any()
                            .downcast_ref::<HiveStoreImpl>()
                            .map(|x| x as &dyn HiveStore)
                    },
                )],
                vec![],
            )
        });
        &INFO
    }
}

impl fmt::Debug for HiveStoreImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HiveStore")
            .field("hives", &self.hive_count())
            .finish()
    }
}

impl Interface for HiveStoreImpl {
    fn class_info(&self) -> &'static ClassInfo {
        Self::class_info_impl()
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_interface(&self) -> &dyn Interface {
        self
    }
}

impl ObjectClass for HiveStoreImpl {
    fn class_info_static() -> &'static ClassInfo {
        Self::class_info_impl()
    }

    fn new_instance() -> Self {
        Self::new()
    }
}

impl HiveStore for HiveStoreImpl {
    fn get_hive(&self, element: Uid) -> Option<SharedPtr<dyn ObjectHive>> {
        let mut hives = lock(&self.hives);
        if let Ok(index) = hives.binary_search_by(|(uid, _)| uid.cmp(&element)) {
            return Some(hives[index].1.clone());
        }
        let hive = super::ObjectHiveImpl::create();
        if hive.initialize(element).failed() {
            return None;
        }
        let index = hives
            .binary_search_by(|(uid, _)| uid.cmp(&element))
            .unwrap_or_else(|i| i);
        hives.insert(index, (element, hive.clone()));
        Some(hive)
    }

    fn find_hive(&self, element: Uid) -> Option<SharedPtr<dyn ObjectHive>> {
        let hives = lock(&self.hives);
        hives
            .binary_search_by(|(uid, _)| uid.cmp(&element))
            .ok()
            .map(|index| hives[index].1.clone())
    }

    fn hive_count(&self) -> usize {
        lock(&self.hives).len()
    }

    fn for_each_hive(&self, visitor: &mut dyn FnMut(Uid, &SharedPtr<dyn ObjectHive>) -> bool) {
        let hives = lock(&self.hives).clone();
        for (uid, hive) in &hives {
            if !visitor(*uid, hive) {
                return;
            }
        }
    }
}
