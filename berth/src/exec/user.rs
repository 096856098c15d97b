//! User/group identity resolution inside a container.
//!
//! A user spec is `user`, `uid`, `user:group`, `uid:gid` or a mix. Names are
//! looked up in the container's `/etc/passwd` and `/etc/group`, read through
//! the runtime.

use crate::runtime::ContainerRuntime;
use berth_shared::errors::{BerthError, BerthResult};

const PASSWD_PATH: &str = "/etc/passwd";
const GROUP_PATH: &str = "/etc/group";

/// Process identity derived from a user spec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    /// Primary gid followed by supplementary groups listing the user.
    pub additional_gids: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// Parse `/etc/passwd` content. Malformed lines are skipped.
pub fn parse_passwd(content: &str) -> Vec<PasswdEntry> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            let _password = fields.next()?;
            let uid = fields.next()?.parse().ok()?;
            let gid = fields.next()?.parse().ok()?;
            Some(PasswdEntry {
                name: name.to_string(),
                uid,
                gid,
            })
        })
        .collect()
}

/// Parse `/etc/group` content. Malformed lines are skipped.
pub fn parse_group(content: &str) -> Vec<GroupEntry> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            let _password = fields.next()?;
            let gid = fields.next()?.parse().ok()?;
            let members = fields
                .next()
                .unwrap_or("")
                .split(',')
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
            Some(GroupEntry {
                name: name.to_string(),
                gid,
                members,
            })
        })
        .collect()
}

/// Resolve a user spec against parsed identity databases.
pub fn resolve(spec: &str, passwd: &[PasswdEntry], groups: &[GroupEntry]) -> BerthResult<Identity> {
    let (user_part, group_part) = match spec.split_once(':') {
        Some((u, g)) => (u, Some(g)),
        None => (spec, None),
    };
    if user_part.is_empty() || group_part.is_some_and(str::is_empty) {
        return Err(BerthError::Identity(format!("invalid user spec '{}'", spec)));
    }

    let (uid, entry) = match user_part.parse::<u32>() {
        Ok(uid) => (uid, passwd.iter().find(|e| e.uid == uid)),
        Err(_) => {
            let entry = passwd
                .iter()
                .find(|e| e.name == user_part)
                .ok_or_else(|| BerthError::Identity(format!("no users found for {}", user_part)))?;
            (entry.uid, Some(entry))
        }
    };

    // A numeric uid without a passwd entry runs with gid 0
    let gid = match group_part {
        None => entry.map_or(0, |e| e.gid),
        Some(group) => match group.parse::<u32>() {
            Ok(gid) => gid,
            Err(_) => {
                groups
                    .iter()
                    .find(|g| g.name == group)
                    .ok_or_else(|| BerthError::Identity(format!("no groups found for {}", group)))?
                    .gid
            }
        },
    };

    let mut additional_gids = vec![gid];
    if let Some(username) = entry.map(|e| e.name.as_str()) {
        for group in groups {
            if group.name != username
                && group.members.iter().any(|m| m == username)
                && !additional_gids.contains(&group.gid)
            {
                additional_gids.push(group.gid);
            }
        }
    }

    Ok(Identity {
        uid,
        gid,
        additional_gids,
    })
}

/// Resolve a user spec using the container's identity databases.
///
/// Missing databases are treated as empty: numeric ids still resolve, names
/// do not.
pub async fn resolve_in_container(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    spec: &str,
) -> BerthResult<Identity> {
    let passwd = read_database(runtime, container_id, PASSWD_PATH).await?;
    let groups = read_database(runtime, container_id, GROUP_PATH).await?;

    let identity = resolve(spec, &parse_passwd(&passwd), &parse_group(&groups))?;
    tracing::debug!(
        container_id = %container_id,
        user = %spec,
        uid = identity.uid,
        gid = identity.gid,
        "Resolved exec identity"
    );
    Ok(identity)
}

async fn read_database(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    path: &str,
) -> BerthResult<String> {
    match runtime.read_file(container_id, path).await? {
        Some(bytes) => String::from_utf8(bytes)
            .map_err(|e| BerthError::Identity(format!("{} is not valid UTF-8: {}", path, e))),
        None => {
            tracing::debug!(container_id = %container_id, path, "Identity database absent");
            Ok(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/sh
# service accounts
www-data:x:33:33:www-data:/var/www:/usr/sbin/nologin
app:x:1000:1000::/home/app:/bin/sh
broken line
";

    const GROUP: &str = "\
root:x:0:
www-data:x:33:
app:x:1000:
docker:x:998:app,ops
audio:x:29:ops
";

    fn dbs() -> (Vec<PasswdEntry>, Vec<GroupEntry>) {
        (parse_passwd(PASSWD), parse_group(GROUP))
    }

    #[test]
    fn test_parse_databases() {
        let (passwd, groups) = dbs();
        assert_eq!(passwd.len(), 3);
        assert_eq!(passwd[1].name, "www-data");
        assert_eq!(passwd[1].uid, 33);
        assert_eq!(groups.len(), 5);
        assert_eq!(groups[3].members, vec!["app", "ops"]);
    }

    #[test]
    fn test_resolve_by_name() {
        let (passwd, groups) = dbs();
        let id = resolve("app", &passwd, &groups).unwrap();
        assert_eq!(id.uid, 1000);
        assert_eq!(id.gid, 1000);
        assert_eq!(id.additional_gids, vec![1000, 998]);
    }

    #[test]
    fn test_resolve_numeric_uid_without_entry() {
        let (passwd, groups) = dbs();
        let id = resolve("4242", &passwd, &groups).unwrap();
        assert_eq!(id.uid, 4242);
        assert_eq!(id.gid, 0);
        assert_eq!(id.additional_gids, vec![0]);
    }

    #[test]
    fn test_resolve_numeric_uid_with_entry() {
        let (passwd, groups) = dbs();
        let id = resolve("33", &passwd, &groups).unwrap();
        assert_eq!((id.uid, id.gid), (33, 33));
    }

    #[test]
    fn test_resolve_user_and_group() {
        let (passwd, groups) = dbs();
        let id = resolve("app:audio", &passwd, &groups).unwrap();
        assert_eq!((id.uid, id.gid), (1000, 29));
        assert_eq!(id.additional_gids, vec![29, 998]);

        let id = resolve("1000:5", &passwd, &groups).unwrap();
        assert_eq!((id.uid, id.gid), (1000, 5));
    }

    #[test]
    fn test_unknown_names_fail() {
        let (passwd, groups) = dbs();
        let err = resolve("nobody", &passwd, &groups).unwrap_err();
        assert!(err.to_string().contains("no users found for nobody"));

        let err = resolve("app:wheel", &passwd, &groups).unwrap_err();
        assert!(err.to_string().contains("no groups found for wheel"));
    }

    #[test]
    fn test_malformed_specs_fail() {
        let (passwd, groups) = dbs();
        assert!(resolve("", &passwd, &groups).is_err());
        assert!(resolve(":0", &passwd, &groups).is_err());
        assert!(resolve("app:", &passwd, &groups).is_err());
    }
}
