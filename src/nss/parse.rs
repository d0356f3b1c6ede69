//! Parsers for `id` and `getent` output

use super::types::{GroupEntry, IdEntry, NameId, PasswdEntry};
use crate::error::{HarnessError, HarnessResult};

/// Parse `uid=1001(user1) gid=1001(user1) groups=1001(user1),2001(group1)`.
///
/// Names may contain spaces (`513(domain users)`), so fields are split on
/// their `key=` markers rather than on whitespace.
pub fn parse_id_output(output: &str) -> HarnessResult<IdEntry> {
    let line = output.trim();
    let mut user = None;
    let mut group = None;
    let mut groups = Vec::new();

    let mut rest = line;
    while !rest.is_empty() {
        let (key, value) = rest
            .split_once('=')
            .ok_or_else(|| HarnessError::invalid_format("key=value field", rest, "id output"))?;
        let (entries, remainder) = match key {
            "uid" | "gid" | "groups" => take_name_ids(value, &format!("id {}", key))?,
            // SELinux context and unknown fields are ignored
            _ => {
                let end = value.find(char::is_whitespace).unwrap_or(value.len());
                (Vec::new(), &value[end..])
            }
        };
        match key {
            "uid" => user = entries.into_iter().next(),
            "gid" => group = entries.into_iter().next(),
            "groups" => groups = entries,
            _ => {}
        }
        rest = remainder.trim_start();
    }

    let user = user.ok_or_else(|| HarnessError::invalid_format("uid= field", line, "id output"))?;
    let group =
        group.ok_or_else(|| HarnessError::invalid_format("gid= field", line, "id output"))?;
    if groups.is_empty() {
        groups.push(group.clone());
    }

    Ok(IdEntry {
        user,
        group,
        groups,
    })
}

/// Comma separated `id(name)` list at the start of `input`, and what follows it
fn take_name_ids<'a>(input: &'a str, data_source: &str) -> HarnessResult<(Vec<NameId>, &'a str)> {
    let mut entries = Vec::new();
    let mut rest = input;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        return Ok((entries, rest));
    }
    loop {
        let (entry, after) = take_name_id(rest, data_source)?;
        entries.push(entry);
        match after.strip_prefix(',') {
            Some(next) => rest = next,
            None if after.is_empty() || after.starts_with(char::is_whitespace) => {
                return Ok((entries, after));
            }
            None => {
                return Err(HarnessError::parse_error(data_source, after, "Unexpected text"));
            }
        }
    }
}

/// `1001(user one)` or a bare `1001` at the start of `input`
fn take_name_id<'a>(input: &'a str, data_source: &str) -> HarnessResult<(NameId, &'a str)> {
    let digits = input.find(|c: char| !c.is_ascii_digit()).unwrap_or(input.len());
    let (id_part, rest) = input.split_at(digits);
    let token = input.split([' ', ',']).next().unwrap_or(input);
    let id = id_part
        .parse::<u32>()
        .map_err(|_| HarnessError::parse_error(data_source, token, "Invalid numeric id"))?;

    match rest.strip_prefix('(') {
        Some(named) => {
            let end = named
                .find(')')
                .ok_or_else(|| HarnessError::parse_error(data_source, input, "Unterminated name"))?;
            Ok((NameId::new(id, Some(&named[..end])), &named[end + 1..]))
        }
        None => Ok((NameId::new(id, None), rest)),
    }
}

/// Parse the first line of `getent passwd`
pub fn parse_passwd_line(output: &str) -> HarnessResult<PasswdEntry> {
    let line = first_line(output, "getent passwd")?;
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != 7 {
        return Err(HarnessError::invalid_format(
            "7 colon-separated fields",
            &format!("{} fields", fields.len()),
            "getent passwd output",
        ));
    }

    let uid = fields[2]
        .parse::<u32>()
        .map_err(|_| HarnessError::parse_error("passwd uid", fields[2], "Invalid uid"))?;
    let gid = fields[3]
        .parse::<u32>()
        .map_err(|_| HarnessError::parse_error("passwd gid", fields[3], "Invalid gid"))?;

    Ok(PasswdEntry {
        name: fields[0].to_string(),
        password: fields[1].to_string(),
        uid,
        gid,
        gecos: fields[4].to_string(),
        home: fields[5].to_string(),
        shell: fields[6].to_string(),
    })
}

/// Parse the first line of `getent group`
pub fn parse_group_line(output: &str) -> HarnessResult<GroupEntry> {
    let line = first_line(output, "getent group")?;
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != 4 {
        return Err(HarnessError::invalid_format(
            "4 colon-separated fields",
            &format!("{} fields", fields.len()),
            "getent group output",
        ));
    }

    let gid = fields[2]
        .parse::<u32>()
        .map_err(|_| HarnessError::parse_error("group gid", fields[2], "Invalid gid"))?;
    let members = fields[3]
        .split(',')
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();

    Ok(GroupEntry {
        name: fields[0].to_string(),
        password: fields[1].to_string(),
        gid,
        members,
    })
}

fn first_line<'a>(output: &'a str, context: &str) -> HarnessResult<&'a str> {
    output
        .lines()
        .map(str::trim_end)
        .find(|l| !l.is_empty())
        .ok_or_else(|| HarnessError::invalid_format("one entry line", "empty output", context))
}
