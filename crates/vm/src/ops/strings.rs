//! String functions. Positions are one-based and counted in characters.

use crate::error::VmResult;
use crate::interp::{Ty, Vm};
use cmm_core::{ident, CmmString, List, Value};
use std::cmp::Ordering;

impl Vm {
    fn arg_str(&self, slot: usize) -> &CmmString {
        self.stack[slot].as_str().expect("checked by func_args")
    }

    pub(crate) fn op_strlen(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str], &[])? else {
            return Ok(());
        };
        let len = self.arg_str(start).as_str().chars().count() as i64;
        self.pop_n(1);
        self.push(Value::Int(len));
        Ok(())
    }

    /// substr(s, start[, len]).
    pub(crate) fn op_substr(&mut self) -> VmResult<()> {
        let Some((start, num_args)) = self.func_args(&[Ty::Str, Ty::Int], &[Ty::Int])? else {
            return Ok(());
        };
        let text = self.arg_str(start).as_str().to_owned();
        let total = text.chars().count() as i64;
        let from = self.stack[start + 1].as_int().expect("checked") - 1;
        let span = if num_args == 3 {
            self.stack[start + 2].as_int().expect("checked")
        } else {
            total - from
        };
        if !self.check_range(from, span, total as usize, start)? {
            return Ok(());
        }
        let taken: String = text
            .chars()
            .skip(from as usize)
            .take(span as usize)
            .collect();
        self.pop_n(num_args);
        self.push(Value::Str(taken.into()));
        Ok(())
    }

    /// explode(s[, separator]): split into words, dropping empty
    /// segments. The default separator is a space.
    pub(crate) fn op_explode(&mut self) -> VmResult<()> {
        let Some((start, num_args)) = self.func_args(&[Ty::Str], &[Ty::Str])? else {
            return Ok(());
        };
        let text = self.arg_str(start).as_str().to_owned();
        let sep = if num_args == 2 {
            self.arg_str(start + 1).as_str().to_owned()
        } else {
            " ".to_owned()
        };
        let words: List = if sep.is_empty() {
            std::iter::once(Value::Str(text.clone().into())).collect()
        } else {
            text.split(sep.as_str())
                .filter(|word| !word.is_empty())
                .map(|word| Value::Str(word.into()))
                .collect()
        };
        self.pop_n(num_args);
        self.push(Value::List(words));
        Ok(())
    }

    /// strsub(s, what, with): replace every occurrence.
    pub(crate) fn op_strsub(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str, Ty::Str, Ty::Str], &[])? else {
            return Ok(());
        };
        let text = self.arg_str(start).as_str().to_owned();
        let what = self.arg_str(start + 1).as_str().to_owned();
        let with = self.arg_str(start + 2).as_str().to_owned();
        let replaced = if what.is_empty() {
            text
        } else {
            text.replace(&what, &with)
        };
        self.pop_n(3);
        self.push(Value::Str(replaced.into()));
        Ok(())
    }

    /// pad(s, len[, fill]): pad or truncate to `len` characters; a
    /// negative length pads on the left.
    pub(crate) fn op_pad(&mut self) -> VmResult<()> {
        let Some((start, num_args)) = self.func_args(&[Ty::Str, Ty::Int], &[Ty::Str])? else {
            return Ok(());
        };
        let text = self.arg_str(start).as_str().to_owned();
        let wanted = self.stack[start + 1].as_int().expect("checked");
        let fill = if num_args == 3 {
            let fill = self.arg_str(start + 2).as_str().to_owned();
            if fill.is_empty() {
                " ".to_owned()
            } else {
                fill
            }
        } else {
            " ".to_owned()
        };

        let target = wanted.unsigned_abs() as usize;
        let have = text.chars().count();
        let padded = if have >= target {
            text.chars().take(target).collect::<String>()
        } else {
            let padding: String = fill.chars().cycle().take(target - have).collect();
            if wanted >= 0 {
                format!("{text}{padding}")
            } else {
                format!("{padding}{text}")
            }
        };
        self.pop_n(num_args);
        self.push(Value::Str(padded.into()));
        Ok(())
    }

    /// match_begin(s, prefix): case-insensitive prefix test.
    pub(crate) fn op_match_begin(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str, Ty::Str], &[])? else {
            return Ok(());
        };
        let text = self.arg_str(start).as_str().to_ascii_lowercase();
        let prefix = self.arg_str(start + 1).as_str().to_ascii_lowercase();
        self.pop_n(2);
        self.push(Value::Int(i64::from(text.starts_with(&prefix))));
        Ok(())
    }

    /// match_template(template, s): word-wise match where a `*` word in
    /// the template matches any run of words.
    pub(crate) fn op_match_template(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str, Ty::Str], &[])? else {
            return Ok(());
        };
        let template = self.arg_str(start).as_str().to_ascii_lowercase();
        let text = self.arg_str(start + 1).as_str().to_ascii_lowercase();
        let matched = template_match(
            &template.split_whitespace().collect::<Vec<_>>(),
            &text.split_whitespace().collect::<Vec<_>>(),
        );
        self.pop_n(2);
        self.push(Value::Int(i64::from(matched)));
        Ok(())
    }

    /// match_pattern(pattern, s): `*` wildcards capture; the captures come
    /// back as a list, or zero when the pattern fails.
    pub(crate) fn op_match_pattern(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str, Ty::Str], &[])? else {
            return Ok(());
        };
        let pattern = self.arg_str(start).as_str().to_owned();
        let text = self.arg_str(start + 1).as_str().to_owned();
        let mut captures = Vec::new();
        let result = if wildcard_match(&pattern, &text, &mut captures) {
            Value::List(
                captures
                    .into_iter()
                    .map(|c| Value::Str(c.into()))
                    .collect(),
            )
        } else {
            Value::Int(0)
        };
        self.pop_n(2);
        self.push(result);
        Ok(())
    }

    /// match_regexp(regexp, s): the whole match and every group as a list
    /// of strings, or zero when the expression does not match.
    pub(crate) fn op_match_regexp(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str, Ty::Str], &[])? else {
            return Ok(());
        };
        let pattern = self.arg_str(start).as_str().to_owned();
        let text = self.arg_str(start + 1).as_str().to_owned();
        let re = match regex::Regex::new(&pattern) {
            Ok(re) => re,
            Err(err) => {
                return self.throw(
                    ident::ids().regexp,
                    format!("Bad regular expression: {err}"),
                );
            }
        };
        let result = match re.captures(&text) {
            Some(caps) => Value::List(
                caps.iter()
                    .map(|group| match group {
                        Some(m) => Value::Str(m.as_str().into()),
                        None => Value::Int(0),
                    })
                    .collect(),
            ),
            None => Value::Int(0),
        };
        self.pop_n(2);
        self.push(result);
        Ok(())
    }

    pub(crate) fn op_uppercase(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str], &[])? else {
            return Ok(());
        };
        let text = self.arg_str(start).as_str().to_ascii_uppercase();
        self.pop_n(1);
        self.push(Value::Str(text.into()));
        Ok(())
    }

    pub(crate) fn op_lowercase(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str], &[])? else {
            return Ok(());
        };
        let text = self.arg_str(start).as_str().to_ascii_lowercase();
        self.pop_n(1);
        self.push(Value::Str(text.into()));
        Ok(())
    }

    /// strcmp(a, b): case-sensitive three-valued comparison; equality and
    /// ordering elsewhere are case-insensitive, this is the escape hatch.
    pub(crate) fn op_strcmp(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str, Ty::Str], &[])? else {
            return Ok(());
        };
        let order = self
            .arg_str(start)
            .as_str()
            .cmp(self.arg_str(start + 1).as_str());
        self.pop_n(2);
        self.push(Value::Int(match order {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }));
        Ok(())
    }
}

fn template_match(template: &[&str], words: &[&str]) -> bool {
    match template.split_first() {
        None => words.is_empty(),
        Some((&"*", rest)) => (0..=words.len()).any(|skip| template_match(rest, &words[skip..])),
        Some((&word, rest)) => match words.split_first() {
            Some((&first, others)) => word == first && template_match(rest, others),
            None => false,
        },
    }
}

fn wildcard_match(pattern: &str, text: &str, captures: &mut Vec<String>) -> bool {
    match pattern.find('*') {
        None => {
            pattern.eq_ignore_ascii_case(text)
        }
        Some(at) => {
            let (head, tail) = pattern.split_at(at);
            let tail = &tail[1..];
            // Byte-wise comparison: equality implies the boundary is safe
            // to split at.
            if text.len() < head.len()
                || !text.as_bytes()[..head.len()].eq_ignore_ascii_case(head.as_bytes())
            {
                return false;
            }
            let rest = &text[head.len()..];
            // Longest-first so later wildcards still get a chance.
            for take in (0..=rest.len()).rev() {
                if !rest.is_char_boundary(take) {
                    continue;
                }
                let mark = captures.len();
                captures.push(rest[..take].to_owned());
                if wildcard_match(tail, &rest[take..], captures) {
                    return true;
                }
                captures.truncate(mark);
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_allow_word_wildcards() {
        let t = |template: &str, text: &str| {
            template_match(
                &template.split_whitespace().collect::<Vec<_>>(),
                &text.split_whitespace().collect::<Vec<_>>(),
            )
        };
        assert!(t("look at *", "look at the red box"));
        assert!(t("* the lever", "pull the lever"));
        assert!(!t("look at *", "look"));
        assert!(t("go", "go"));
    }

    #[test]
    fn wildcards_capture_their_fills() {
        let mut captures = Vec::new();
        assert!(wildcard_match("give * to *", "give the sword to rilla", &mut captures));
        assert_eq!(captures, vec!["the sword".to_owned(), "rilla".to_owned()]);

        captures.clear();
        assert!(!wildcard_match("give * to *", "drop the sword", &mut captures));
    }
}
