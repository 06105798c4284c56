//! 工具函数模块
//!
//! 连接 URI 选项使用的时长与布尔值解析

use crate::error::{RegistryError, Result};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// 解析 `5s`、`1m30s`、`250ms`、`1.5h` 形式的时长
///
/// 支持的单位：`ns`、`us`（`µs`）、`ms`、`s`、`m`、`h`；纯 `0` 表示零时长。
/// 不接受负数。
pub fn parse_duration(input: &str) -> Result<Duration> {
    let text = input.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.is_empty() {
        return Err(RegistryError::invalid_option("empty duration"));
    }

    let invalid = || RegistryError::invalid_option(format!("invalid duration: {:?}", input));
    let mut rest = text.strip_prefix('+').unwrap_or(text);
    let mut total = 0f64;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let number: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        total += number * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(total as u64))
}

/// 宽松的布尔值转换：`1`、`t`、`true`、`yes`、`on`（不区分大小写）为真
pub fn cast_bool(input: &str) -> bool {
    matches!(
        input.trim().to_ascii_lowercase().as_str(),
        "1" | "t" | "true" | "yes" | "y" | "on"
    )
}

/// 解析后的连接 URI：`scheme://[user:password@]host[,host...][/path][?opt=val&...]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryUri {
    pub scheme: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// 主机列表，已过滤空项
    pub hosts: Vec<String>,
    pub path: String,
    pub options: HashMap<String, String>,
}

impl RegistryUri {
    /// 解析连接 URI
    ///
    /// `url` crate 不接受逗号分隔的多主机 authority，因此主机列表从原始文本截取，
    /// 其余部分用占位主机交给 `url` 解析。
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, after_scheme) = uri
            .split_once("://")
            .ok_or_else(|| RegistryError::invalid_uri(format!("missing scheme: {}", uri)))?;
        let end = after_scheme
            .find(|c| c == '/' || c == '?' || c == '#')
            .unwrap_or(after_scheme.len());
        let (authority, tail) = after_scheme.split_at(end);
        let (userinfo, hosts) = match authority.rsplit_once('@') {
            Some((userinfo, hosts)) => (Some(userinfo), hosts),
            None => (None, authority),
        };

        let placeholder = match userinfo {
            Some(userinfo) => format!("{}://{}@placeholder{}", scheme, userinfo, tail),
            None => format!("{}://placeholder{}", scheme, tail),
        };
        let parsed = Url::parse(&placeholder)?;

        Ok(Self {
            scheme: parsed.scheme().to_string(),
            user: Some(parsed.username())
                .filter(|u| !u.is_empty())
                .map(str::to_string),
            password: parsed.password().map(str::to_string),
            hosts: split_hosts(hosts),
            path: parsed.path().to_string(),
            options: parsed
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        })
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    /// 读取时长选项；不存在时返回 `None`，格式错误时报错
    pub fn duration_option(&self, name: &str) -> Result<Option<Duration>> {
        self.option(name).map(parse_duration).transpose()
    }
}

/// 拆分逗号分隔的主机列表，过滤空项
pub fn split_hosts(hosts: &str) -> Vec<String> {
    hosts
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}
