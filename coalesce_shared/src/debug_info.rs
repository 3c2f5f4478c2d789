use std::{borrow::Cow, time::Instant};

/// Indicates where something was created in the code.
#[derive(Debug, Clone)]
pub struct CodeLocation {
    pub file: &'static str,
    pub line: u32,
}

/// A set of information that can be attached to command buffers and allocations to make log output readable.
#[derive(Default, Debug, Clone)]
pub struct DebugInfo {
    pub name: Option<Cow<'static, str>>,
    pub origin_function_name: Option<&'static str>,
    pub code_location: Option<CodeLocation>,
    pub created_instant: Option<Instant>,
}

impl DebugInfo {
    pub fn with_name(mut self, name: Cow<'static, str>) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_origin_function_name(mut self, origin_function_name: impl Into<&'static str>) -> Self {
        self.origin_function_name = Some(origin_function_name.into());
        self
    }

    pub fn with_code_location(mut self, code_location: CodeLocation) -> Self {
        self.code_location = Some(code_location);
        self
    }

    pub fn with_created_now(mut self) -> Self {
        self.created_instant = Some(Instant::now());
        self
    }

    /// Returns the name or `"unknown"` when no name was given
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("unknown")
    }

    pub fn format_one_line(&self) -> String {
        match &self.code_location {
            Some(location) => format!("DebugInfo {{ name: {}, at: {}:{} }}", self.name(), location.file, location.line),
            None => format!("DebugInfo {{ name: {} }}", self.name()),
        }
    }
}

/// Name of the function this macro is called in
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        &name[..name.len() - 3]
    }};
}

#[macro_export]
macro_rules! code_location {
    () => {
        $crate::CodeLocation {
            file: file!(),
            line: line!(),
        }
    };
}

#[macro_export]
macro_rules! debug_info {
    ($name:literal) => {
        $crate::DebugInfo::default()
            .with_name(std::borrow::Cow::Borrowed($name))
            .with_origin_function_name($crate::function_name!())
            .with_code_location($crate::code_location!())
            .with_created_now()
    };
    ($name:expr) => {
        $crate::DebugInfo::default()
            .with_name(std::borrow::Cow::Owned($name.to_string()))
            .with_origin_function_name($crate::function_name!())
            .with_code_location($crate::code_location!())
            .with_created_now()
    };
}
