/// Basic 认证凭据存储
///
/// user -> password 的线程安全映射；凭据文件一行一条 user:pass，
/// `#` 开头的行与格式错误的行跳过
use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Default)]
pub struct BasicAuth {
    data: RwLock<HashMap<String, String>>,
}

impl BasicAuth {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// 从文件加载凭据，返回加载条数
    pub fn add_from_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read auth file: {:?}", path))?;

        let pairs: Vec<String> = content
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| line.to_string())
            .collect();

        let n = self.add(&pairs);
        info!("Auth file loaded, users: {}", n);
        Ok(n)
    }

    /// 加入一组 user:pass 凭据，返回实际加入条数
    pub fn add(&self, userpass_list: &[String]) -> usize {
        let mut data = self.data.write();
        let mut n = 0;
        for userpass in userpass_list {
            if let Some((user, pass)) = userpass.trim().split_once(':') {
                data.insert(user.to_string(), pass.to_string());
                n += 1;
            }
        }
        n
    }

    /// 校验用户名与密码
    pub fn check_user_pass(&self, user: &str, pass: &str) -> bool {
        let data = self.data.read();
        data.get(user).map(|p| p == pass).unwrap_or(false)
    }

    /// 校验 "user:pass" 形式的凭据
    pub fn check(&self, userpass: &str) -> bool {
        match userpass.trim().split_once(':') {
            Some((user, pass)) => self.check_user_pass(user, pass),
            None => false,
        }
    }

    /// 当前凭据总数
    pub fn total(&self) -> usize {
        self.data.read().len()
    }
}
