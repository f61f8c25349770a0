//! Identifier case conversion between client field names and database column names.

use serde_json::{Map, Value};

/// `user_custom_id` -> `userCustomId`
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper_next = false;
    for c in s.chars() {
        match c {
            '_' if !out.is_empty() => upper_next = true,
            _ if upper_next => {
                out.extend(c.to_uppercase());
                upper_next = false;
            }
            _ => out.push(c),
        }
    }
    out
}

/// `roleName` -> `role_name`
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for c in s.chars() {
        if c.is_uppercase() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Rewrite object keys to snake_case in place. A key already in snake_case wins over its camelCase twin.
pub fn object_keys_to_snake_case(obj: &mut Map<String, Value>) {
    let keys: Vec<String> = obj.keys().cloned().collect();
    for k in keys {
        let snake = to_snake_case(&k);
        if snake == k {
            continue;
        }
        if let Some(v) = obj.remove(&k) {
            obj.entry(snake).or_insert(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_identifiers() {
        assert_eq!(to_camel_case("user_custom_id"), "userCustomId");
        assert_eq!(to_camel_case("name"), "name");
        assert_eq!(to_snake_case("createdAt"), "created_at");
        assert_eq!(to_snake_case("isSystemRole"), "is_system_role");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn object_keys_become_snake_case() {
        let mut v = json!({"roleName": "admin", "is_system_role": true, "description": "x"});
        object_keys_to_snake_case(v.as_object_mut().unwrap());
        assert_eq!(v, json!({"role_name": "admin", "is_system_role": true, "description": "x"}));
    }

    #[test]
    fn snake_key_wins_over_camel_twin() {
        let mut v = json!({"role_name": "kept", "roleName": "dropped"});
        object_keys_to_snake_case(v.as_object_mut().unwrap());
        assert_eq!(v, json!({"role_name": "kept"}));
    }
}
