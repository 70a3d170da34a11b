//! # Petri 网核心定义（Place/Transition Net）
//!
//! 设库所集合 `P` 与迁移集合 `T`，输入/输出映射 `Pre, Post ∈ ℕ^{|P|×|T|}`，
//! 关联矩阵 `C = Post - Pre`（仅统计普通弧）。抑制弧与复位弧不进入 `C`，
//! 但参与可发生判定与发生语义（见 [`core`]）。
//!
//! ## 示例
//!
//! ```rust
//! use pn_analyzer::net::*;
//!
//! let model = NetModel::new("chain")
//!     .place("p1", 1.0)
//!     .place("p2", 0.0)
//!     .transition("t1")
//!     .arc("p1", "t1")
//!     .arc("t1", "p2");
//! let net = Net::from_model(&model).unwrap();
//!
//! let marking = net.initial_marking();
//! let t1 = net.transition_index("t1").unwrap();
//! assert_eq!(net.enabled_transitions(&marking), vec![t1]);
//! let next = net.fire_transition(&marking, t1).unwrap();
//! assert_eq!(next.tokens(net.place_index("p2").unwrap()), 1);
//! ```

pub mod core;
pub mod ids;
pub mod incidence;
pub mod index_vec;
pub mod io;
pub mod model;
pub mod structure;

pub use self::core::{FireError, Net};
pub use ids::{NodeId, PlaceId, TransitionId};
pub use incidence::{Incidence, IncidenceBool};
pub use index_vec::{Idx, IndexVec};
pub use model::{ArcSpec, ModelError, NetModel, PlaceSpec, Snapshot, TransitionSpec};
pub use structure::{Arc, ArcDirection, ArcKind, Marking, Place, Transition, TransitionKind, Weight};
