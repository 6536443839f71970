//! 嵌套的符号表。

use std::collections::HashMap;

/// 名称到值的映射，带一个借用的父作用域
#[derive(Debug)]
pub struct Environment<'p, T> {
    bindings: HashMap<String, T>,
    parent: Option<&'p Environment<'p, T>>,
}

impl<'p, T> Default for Environment<'p, T> {
    fn default() -> Self {
        Self {
            bindings: HashMap::new(),
            parent: None,
        }
    }
}

impl<'p, T> Environment<'p, T> {
    /// 创建一个没有父作用域的环境。
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建一个以 `self` 为父作用域的局部环境。
    pub fn create_local_environment(&self) -> Environment<'_, T> {
        Environment {
            bindings: HashMap::new(),
            parent: Some(self),
        }
    }

    /// 在局部作用域中绑定，遮蔽父作用域中的同名绑定。
    pub fn define(&mut self, name: impl Into<String>, value: T) {
        self.bindings.insert(name.into(), value);
    }

    /// 先查局部作用域，再沿父作用域链向上查找。
    pub fn look_up(&self, name: &str) -> Option<&T> {
        match self.bindings.get(name) {
            Some(value) => Some(value),
            None => self.parent.and_then(|parent| parent.look_up(name)),
        }
    }

    /// 名称是否绑定在局部作用域中
    pub fn is_local(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }
}
