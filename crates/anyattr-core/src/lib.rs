pub mod allowed;
pub mod any;
pub mod attr;
pub mod codec;
pub mod derived;
pub mod error;
pub mod id;
pub mod mapping;
pub mod provision;
pub mod registry;
pub mod schema;
pub mod types;
pub mod value;
pub mod virtual_attr;

// Re-export commonly used types
pub use allowed::{AllowedSchemas, SchemaSet};
pub use any::{Any, AnyDetails, GroupResolver, Membership, TypeExtension};
pub use attr::{AttrWriteContext, BasicValidator, PlainAttr, PlainAttrValidator};
pub use codec::{CipherConfig, Encryptor, KeyedDigestEncryptor, TypeCodec, TypedValue};
pub use derived::{DerivedAttrEvaluator, ExpressionEvaluator};
pub use error::CoreError;
pub use id::{AnyKey, MembershipKey};
pub use mapping::{ConnAttribute, ExternalResource, IntMappingType, Mapping, MappingItem, MappingPurpose, Provision};
pub use registry::{SchemaRegistry, SchemaUsage, Unused};
pub use schema::{AnyType, AnyTypeClass, DerSchema, PlainSchema, Schema, VirSchema};
pub use types::{AnyTypeKind, AttrSchemaType, SchemaKind};
pub use value::AttrValue;
pub use virtual_attr::{VirAttrSource, VirtualAttrBridge};
