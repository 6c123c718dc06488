use std::borrow::Cow;

/// Quotes `value` so that it is passed as a single word to a POSIX shell.
/// Values consisting only of safe characters are returned unchanged.
pub fn shell_quote(value: &str) -> Cow<'_, str> {
    if value.is_empty() {
        Cow::Borrowed("''")
    } else if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!("'{}'", value.replace('\'', r#"'"'"'"#)))
    }
}

/// Quotes each argument and joins them with a space.
pub fn shell_join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| shell_quote(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wraps `value` in double quotes for a POSIX shell.
///
/// Parameter expansion (`$VAR`) stays active, backslashes, quotes and backticks are escaped.
pub fn shell_double_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Formats arguments using the HTCondor "new" argument syntax.
///
/// The whole list is wrapped in double quotes, arguments containing whitespace or quotes are
/// wrapped in single quotes and embedded quotes are doubled.
pub fn condor_arguments<S: AsRef<str>>(args: &[S]) -> String {
    let args = args
        .iter()
        .map(|arg| {
            let arg = arg.as_ref().replace('"', "\"\"");
            if arg.is_empty() || arg.contains([' ', '\t', '\'']) {
                format!("'{}'", arg.replace('\'', "''"))
            } else {
                arg
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    format!("\"{args}\"")
}
