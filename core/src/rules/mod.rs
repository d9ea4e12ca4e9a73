// Rules module - 规则模块
// 声明式规则定义、加载与只读注册表

pub mod loader;
pub mod model;
pub mod predicate;
pub mod registry;
