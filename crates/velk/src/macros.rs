//! Declarative surfaces: [`interface!`](crate::interface!) declares an
//! introspectable interface contract, [`object_class!`](crate::object_class!)
//! declares a concrete class implementing a set of them.

/// Declares an interface: identity, inline state, member descriptors,
/// typed accessors, and (optionally) a function-hook trait that concrete
/// classes implement.
///
/// ```ignore
/// velk::interface! {
///     /// A widget surface.
///     pub interface IMyWidget {
///         properties {
///             width: f32 = 100.0;
///             height: f32 = 50.0;
///         }
///         readonly {
///             id: u32 = 7;
///         }
///         arrays {
///             tags: String = [];
///         }
///         events {
///             on_clicked;
///         }
///         functions(IMyWidgetFns) {
///             fn reset();
///             fn grow(amount: f32) -> f32;
///             raw fn process();
///         }
///     }
/// }
/// ```
///
/// Sections are optional but must appear in the order shown. An explicit
/// UUID replaces the name-derived identifier
/// (`pub interface IMyWidget("cc262192-…")`), and a parent interface is
/// declared with `pub interface IChild: IBase`. When both the parent and
/// the child declare functions, the child's hook trait must name the
/// parent's as its supertrait (`functions(IChildFns: IBaseFns)`).
///
/// The generated marker type carries the `UID`, an `append_entries::<C>`
/// hook consumed by [`object_class!`](crate::object_class!), and one typed
/// accessor per member (`IMyWidget::width(&*obj).get_value()`).
#[macro_export]
macro_rules! interface {
    (
        $(#[$meta:meta])*
        $vis:vis interface $name:ident $(($uuid:literal))? $(: $parent:ident)? {
            $(properties {
                $($pname:ident : $ptype:ty = $pdefault:expr;)*
            })?
            $(readonly {
                $($rname:ident : $rtype:ty = $rdefault:expr;)*
            })?
            $(arrays {
                $($aname:ident : $atype:ty = [$($adefault:expr),* $(,)?];)*
            })?
            $(readonly_arrays {
                $($qname:ident : $qtype:ty = [$($qdefault:expr),* $(,)?];)*
            })?
            $(events {
                $($ename:ident;)*
            })?
            $(functions($fns_name:ident $(: $fns_parent:ident)?) {
                $($fn_member:tt)*
            })?
        }
    ) => {
        $crate::__paste! {
            $(#[$meta])*
            #[derive(Debug)]
            $vis struct $name;

            /// Inline per-object state declared by the interface.
            #[derive(Clone, PartialEq)]
            #[allow(missing_debug_implementations)]
            $vis struct [<$name State>] {
                $($(pub $pname: $ptype,)*)?
                $($(pub $rname: $rtype,)*)?
                $($(pub $aname: ::std::vec::Vec<$atype>,)*)?
                $($(pub $qname: ::std::vec::Vec<$qtype>,)*)?
            }

            impl ::std::default::Default for [<$name State>] {
                fn default() -> Self {
                    Self {
                        $($($pname: $pdefault,)*)?
                        $($($rname: $rdefault,)*)?
                        $($($aname: ::std::vec![$($adefault),*],)*)?
                        $($($qname: ::std::vec![$($qdefault),*],)*)?
                    }
                }
            }

            $(
                /// Function hooks routed to by the interface's trampolines.
                $vis trait $fns_name $(: $fns_parent)? {
                    $crate::__velk_fn_trait_methods! { $($fn_member)* }
                }

                impl $crate::InterfaceId for dyn $fns_name {
                    const UID: $crate::Uid = <$name as $crate::InterfaceDecl>::UID;
                    const NAME: &'static str = ::std::stringify!($name);
                }
            )?

            impl $crate::InterfaceDecl for $name {
                const UID: $crate::Uid = {
                    #[allow(unused_variables)]
                    let uid = $crate::Uid::from_name(::std::stringify!($name));
                    $(let uid = $crate::Uid::parse($uuid);)?
                    uid
                };
                const NAME: &'static str = ::std::stringify!($name);
                type State = [<$name State>];

                #[allow(unused_variables, unused_mut)]
                fn append_members(out: &mut ::std::vec::Vec<$crate::MemberDesc>) {
                    $(<$parent as $crate::InterfaceDecl>::append_members(out);)?
                    $($(
                        out.push($crate::MemberDesc::property(
                            ::std::stringify!($pname),
                            <Self as $crate::InterfaceDecl>::INFO,
                            $crate::PropertyBind {
                                type_uid: $crate::type_uid::<$ptype>(),
                                default_value: || ::std::option::Option::Some(
                                    $crate::OwnedAny::<$ptype>::boxed(
                                        <[<$name State>] as ::std::default::Default>::default().$pname,
                                    ),
                                ),
                                state_ref: |owner| {
                                    $crate::Interface::property_state(owner, <$name as $crate::InterfaceDecl>::UID)?;
                                    ::std::option::Option::Some($crate::StateRefAny::<$name, $ptype>::boxed(
                                        owner.get_self_weak(),
                                        |state| &mut state.$pname,
                                    ))
                                },
                                flags: $crate::ObjectFlags::empty(),
                            },
                        ));
                    )*)?
                    $($(
                        out.push($crate::MemberDesc::property(
                            ::std::stringify!($rname),
                            <Self as $crate::InterfaceDecl>::INFO,
                            $crate::PropertyBind {
                                type_uid: $crate::type_uid::<$rtype>(),
                                default_value: || ::std::option::Option::Some(
                                    $crate::OwnedAny::<$rtype>::boxed(
                                        <[<$name State>] as ::std::default::Default>::default().$rname,
                                    ),
                                ),
                                state_ref: |owner| {
                                    $crate::Interface::property_state(owner, <$name as $crate::InterfaceDecl>::UID)?;
                                    ::std::option::Option::Some($crate::StateRefAny::<$name, $rtype>::boxed(
                                        owner.get_self_weak(),
                                        |state| &mut state.$rname,
                                    ))
                                },
                                flags: $crate::ObjectFlags::READ_ONLY,
                            },
                        ));
                    )*)?
                    $($(
                        out.push($crate::MemberDesc::property(
                            ::std::stringify!($aname),
                            <Self as $crate::InterfaceDecl>::INFO,
                            $crate::PropertyBind {
                                type_uid: $crate::type_uid::<::std::vec::Vec<$atype>>(),
                                default_value: || ::std::option::Option::Some(
                                    $crate::ArrayAnyValue::<$atype>::boxed(
                                        <[<$name State>] as ::std::default::Default>::default().$aname,
                                    ),
                                ),
                                state_ref: |owner| {
                                    $crate::Interface::property_state(owner, <$name as $crate::InterfaceDecl>::UID)?;
                                    ::std::option::Option::Some($crate::ArrayStateRefAny::<$name, $atype>::boxed(
                                        owner.get_self_weak(),
                                        |state| &mut state.$aname,
                                    ))
                                },
                                flags: $crate::ObjectFlags::empty(),
                            },
                        ));
                    )*)?
                    $($(
                        out.push($crate::MemberDesc::property(
                            ::std::stringify!($qname),
                            <Self as $crate::InterfaceDecl>::INFO,
                            $crate::PropertyBind {
                                type_uid: $crate::type_uid::<::std::vec::Vec<$qtype>>(),
                                default_value: || ::std::option::Option::Some(
                                    $crate::ArrayAnyValue::<$qtype>::boxed(
                                        <[<$name State>] as ::std::default::Default>::default().$qname,
                                    ),
                                ),
                                state_ref: |owner| {
                                    $crate::Interface::property_state(owner, <$name as $crate::InterfaceDecl>::UID)?;
                                    ::std::option::Option::Some($crate::ArrayStateRefAny::<$name, $qtype>::boxed(
                                        owner.get_self_weak(),
                                        |state| &mut state.$qname,
                                    ))
                                },
                                flags: $crate::ObjectFlags::READ_ONLY,
                            },
                        ));
                    )*)?
                    $($(
                        out.push($crate::MemberDesc::event(
                            ::std::stringify!($ename),
                            <Self as $crate::InterfaceDecl>::INFO,
                        ));
                    )*)?
                    $(
                        $crate::__velk_fn_members! { $name, $fns_name, out, $($fn_member)* }
                    )?
                }
            }

            impl $name {
                /// Appends this interface's cast-table entries (and its
                /// ancestors') for concrete class `C`.
                #[allow(unused_mut)]
                pub fn append_entries<C>(out: &mut ::std::vec::Vec<$crate::InterfaceEntry>)
                where
                    C: $crate::Interface $(+ $fns_name)?,
                {
                    let mut entry = $crate::InterfaceEntry::marker(
                        <$name as $crate::InterfaceDecl>::INFO,
                    );
                    $(
                        entry = $crate::InterfaceEntry::with_caster::<dyn $fns_name>(
                            <$name as $crate::InterfaceDecl>::INFO,
                            |o| {
                                $crate::Interface::as_any(o)
                                    .downcast_ref::<C>()
                                    .map(|x| x as &dyn $fns_name)
                            },
                        );
                    )?
                    out.push(entry);
                    $(<$parent>::append_entries::<C>(out);)?
                }

                $($(
                    /// Typed accessor for the property member.
                    pub fn $pname(obj: &dyn $crate::Interface) -> $crate::api::Property<$ptype> {
                        $crate::api::Property::new(obj.get_property(::std::stringify!($pname)))
                    }
                )*)?
                $($(
                    /// Typed accessor for the read-only property member.
                    pub fn $rname(obj: &dyn $crate::Interface) -> $crate::api::ConstProperty<$rtype> {
                        $crate::api::ConstProperty::new(obj.get_property(::std::stringify!($rname)))
                    }
                )*)?
                $($(
                    /// Typed accessor for the array property member.
                    pub fn $aname(obj: &dyn $crate::Interface) -> $crate::api::ArrayProperty<$atype> {
                        $crate::api::ArrayProperty::new(obj.get_property(::std::stringify!($aname)))
                    }
                )*)?
                $($(
                    /// Typed accessor for the read-only array property member.
                    pub fn $qname(obj: &dyn $crate::Interface) -> $crate::api::ArrayProperty<$qtype> {
                        $crate::api::ArrayProperty::new(obj.get_property(::std::stringify!($qname)))
                    }
                )*)?
                $($(
                    /// Typed accessor for the event member.
                    pub fn $ename(obj: &dyn $crate::Interface) -> $crate::api::EventHandle {
                        $crate::api::EventHandle::new(obj.get_event(::std::stringify!($ename)))
                    }
                )*)?
                $(
                    $crate::__velk_fn_accessors! { $($fn_member)* }
                )?
            }
        }
    };
}

/// Trait-method declarations for a `functions(...)` section.
#[doc(hidden)]
#[macro_export]
macro_rules! __velk_fn_trait_methods {
    () => {};
    (fn $f:ident($($an:ident : $at:ty),* $(,)?) $(-> $ret:ty)?; $($rest:tt)*) => {
        fn $f(&self $(, $an: $at)*) $(-> $ret)?;
        $crate::__velk_fn_trait_methods! { $($rest)* }
    };
    (raw fn $f:ident(); $($rest:tt)*) => {
        fn $f(&self, args: $crate::FnArgs<'_>) -> ::std::option::Option<$crate::AnyPtr>;
        $crate::__velk_fn_trait_methods! { $($rest)* }
    };
}

/// Member descriptors (with trampolines) for a `functions(...)` section.
#[doc(hidden)]
#[macro_export]
macro_rules! __velk_fn_members {
    ($iface:ident, $fns:ident, $out:ident $(,)?) => {};
    ($iface:ident, $fns:ident, $out:ident,
     fn $f:ident($($an:ident : $at:ty),* $(,)?) -> $ret:ty; $($rest:tt)*) => {
        $out.push($crate::MemberDesc::function(
            ::std::stringify!($f),
            <$iface as $crate::InterfaceDecl>::INFO,
            $crate::FunctionBind {
                trampoline: ::std::option::Option::Some(|owner, args| {
                    let target = $crate::interface_cast::<dyn $fns, _>(owner)?;
                    if args.len() < <[()]>::len(&[$({ ::std::stringify!($an); }),*]) {
                        return ::std::option::Option::None;
                    }
                    #[allow(unused_variables, unused_mut)]
                    let mut it = args.iter();
                    $(let $an: $at = $crate::extract_arg::<$at>(it.next().copied());)*
                    let result = target.$f($($an),*);
                    ::std::option::Option::Some($crate::OwnedAny::<$ret>::boxed(result))
                }),
                args: ::std::vec![$($crate::FnArgDesc {
                    name: ::std::stringify!($an),
                    type_uid: $crate::type_uid::<$at>(),
                }),*],
            },
        ));
        $crate::__velk_fn_members! { $iface, $fns, $out, $($rest)* }
    };
    ($iface:ident, $fns:ident, $out:ident,
     fn $f:ident($($an:ident : $at:ty),* $(,)?); $($rest:tt)*) => {
        $out.push($crate::MemberDesc::function(
            ::std::stringify!($f),
            <$iface as $crate::InterfaceDecl>::INFO,
            $crate::FunctionBind {
                trampoline: ::std::option::Option::Some(|owner, args| {
                    let target = $crate::interface_cast::<dyn $fns, _>(owner)?;
                    if args.len() < <[()]>::len(&[$({ ::std::stringify!($an); }),*]) {
                        return ::std::option::Option::None;
                    }
                    #[allow(unused_variables, unused_mut)]
                    let mut it = args.iter();
                    $(let $an: $at = $crate::extract_arg::<$at>(it.next().copied());)*
                    target.$f($($an),*);
                    ::std::option::Option::None
                }),
                args: ::std::vec![$($crate::FnArgDesc {
                    name: ::std::stringify!($an),
                    type_uid: $crate::type_uid::<$at>(),
                }),*],
            },
        ));
        $crate::__velk_fn_members! { $iface, $fns, $out, $($rest)* }
    };
    ($iface:ident, $fns:ident, $out:ident,
     raw fn $f:ident(); $($rest:tt)*) => {
        $out.push($crate::MemberDesc::function(
            ::std::stringify!($f),
            <$iface as $crate::InterfaceDecl>::INFO,
            $crate::FunctionBind {
                trampoline: ::std::option::Option::Some(|owner, args| {
                    let target = $crate::interface_cast::<dyn $fns, _>(owner)?;
                    target.$f(args)
                }),
                args: ::std::vec::Vec::new(),
            },
        ));
        $crate::__velk_fn_members! { $iface, $fns, $out, $($rest)* }
    };
}

/// Typed accessors for a `functions(...)` section.
#[doc(hidden)]
#[macro_export]
macro_rules! __velk_fn_accessors {
    () => {};
    (fn $f:ident($($an:ident : $at:ty),* $(,)?) $(-> $ret:ty)?; $($rest:tt)*) => {
        /// Typed accessor for the function member.
        pub fn $f(obj: &dyn $crate::Interface) -> $crate::api::FunctionHandle {
            $crate::api::FunctionHandle::new(obj.get_function(::std::stringify!($f)))
        }
        $crate::__velk_fn_accessors! { $($rest)* }
    };
    (raw fn $f:ident(); $($rest:tt)*) => {
        /// Typed accessor for the raw function member.
        pub fn $f(obj: &dyn $crate::Interface) -> $crate::api::FunctionHandle {
            $crate::api::FunctionHandle::new(obj.get_function(::std::stringify!($f)))
        }
        $crate::__velk_fn_accessors! { $($rest)* }
    };
}

/// Declares a concrete object class implementing a set of interfaces.
///
/// ```ignore
/// velk::object_class! {
///     /// A concrete widget.
///     pub class MyWidget {
///         uid: "11f3c2ce-66f1-4763-b220-4e93e2fdd6a0",
///         implements: [IMyWidget, ISerializable],
///     }
/// }
/// ```
///
/// Optional entries, in order: `uid:` (explicit class UUID; defaults to the
/// name hash), `implements:` (interface markers from
/// [`interface!`](crate::interface!)), `traits:` (runtime traits such as
/// `Plugin` the class implements, each queryable through
/// [`interface_cast`](crate::interface_cast)), and `fields:` (extra struct
/// fields with initialisers).
///
/// The generated struct holds the object core, the lazy member cache, and
/// one state cell per listed interface; `Class::create()` heap-allocates a
/// wired instance and `Class::factory()` yields the registry factory.
#[macro_export]
macro_rules! object_class {
    (
        $(#[$meta:meta])*
        $vis:vis class $class:ident {
            $(uid: $uuid:literal,)?
            implements: [$($intf:ident),* $(,)?]
            $(, traits: [$($rtrait:path),* $(,)?])?
            $(, fields: { $($fname:ident : $ftype:ty = $finit:expr),* $(,)? })?
            $(,)?
        }
    ) => {
        $crate::__paste! {
            $(#[$meta])*
            #[allow(missing_debug_implementations)]
            $vis struct $class {
                core: $crate::ObjectCore,
                members: $crate::MemberCache,
                $([<state_ $intf:snake>]: $crate::StateCell<<$intf as $crate::InterfaceDecl>::State>,)*
                $($($fname: $ftype,)*)?
            }

            impl $class {
                /// Class identifier.
                pub const CLASS_UID: $crate::Uid = {
                    #[allow(unused_variables)]
                    let uid = $crate::Uid::from_name(::std::stringify!($class));
                    $(let uid = $crate::Uid::parse($uuid);)?
                    uid
                };

                /// Static class descriptor, built on first use.
                pub fn class_info() -> &'static $crate::ClassInfo {
                    static INFO: ::std::sync::LazyLock<$crate::ClassInfo> =
                        ::std::sync::LazyLock::new(|| {
                            #[allow(unused_mut)]
                            let mut interfaces = ::std::vec::Vec::new();
                            $($intf::append_entries::<$class>(&mut interfaces);)*
                            $($(interfaces.push($crate::InterfaceEntry::with_caster::<dyn $rtrait>(
                                <dyn $rtrait as $crate::InterfaceId>::INFO,
                                |o| {
                                    $crate::Interface::as_any(o)
                                        .downcast_ref::<$class>()
                                        .map(|x| x as &dyn $rtrait)
                                },
                            ));)*)?
                            #[allow(unused_mut)]
                            let mut members = ::std::vec::Vec::new();
                            $(<$intf as $crate::InterfaceDecl>::append_members(&mut members);)*
                            $crate::ClassInfo::new(
                                $class::CLASS_UID,
                                ::std::stringify!($class),
                                interfaces,
                                members,
                            )
                        });
                    &INFO
                }

                /// Registry factory for this class.
                pub fn factory() -> ::std::sync::Arc<dyn $crate::ObjectFactory> {
                    ::std::sync::Arc::new($crate::ClassFactory::<$class>::new())
                }

                /// Heap-allocates a wired instance.
                pub fn create() -> $crate::SharedPtr<dyn $crate::Interface> {
                    $crate::make_object(<Self as $crate::ObjectClass>::new_instance())
                }
            }

            impl $crate::Interface for $class {
                fn class_info(&self) -> &'static $crate::ClassInfo {
                    Self::class_info()
                }

                fn core(&self) -> &$crate::ObjectCore {
                    &self.core
                }

                fn as_any(&self) -> &dyn ::std::any::Any {
                    self
                }

                fn as_interface(&self) -> &dyn $crate::Interface {
                    self
                }

                #[allow(unused_variables)]
                fn property_state(
                    &self,
                    interface: $crate::Uid,
                ) -> ::std::option::Option<&dyn $crate::StateSlot> {
                    $(
                        if interface == <$intf as $crate::InterfaceDecl>::UID {
                            return ::std::option::Option::Some(&self.[<state_ $intf:snake>]);
                        }
                    )*
                    ::std::option::Option::None
                }

                fn member_cache(&self) -> ::std::option::Option<&$crate::MemberCache> {
                    ::std::option::Option::Some(&self.members)
                }
            }

            impl $crate::ObjectClass for $class {
                fn class_info_static() -> &'static $crate::ClassInfo {
                    Self::class_info()
                }

                fn new_instance() -> Self {
                    Self {
                        core: $crate::ObjectCore::new(),
                        members: $crate::MemberCache::new(),
                        $([<state_ $intf:snake>]: $crate::StateCell::new(),)*
                        $($($fname: $finit,)*)?
                    }
                }
            }
        }
    };
}
